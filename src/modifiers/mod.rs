//! The contact modifier catalogue. Modifiers are the only way contact state
//! changes while the engine runs: each one computes the diff against the
//! current contact and emits the corresponding event only when something
//! actually changed.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::assets::{
    AssetKind, Dependency, Field, FieldType, MissingCallback, Reference, SessionAssets,
};
use crate::contacts::{Contact, ContactStatus, FieldValue, Urn};
use crate::envs::Environment;
use crate::error::{ModifierReadError, ReadError};
use crate::events::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupsModification {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrnsModification {
    Append,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Modifier {
    Name {
        name: Option<String>,
    },
    Language {
        language: Option<String>,
    },
    Timezone {
        timezone: Option<String>,
    },
    Field {
        field: Reference,
        value: Option<String>,
    },
    Groups {
        modification: GroupsModification,
        groups: Vec<Reference>,
    },
    Urns {
        modification: UrnsModification,
        urn: String,
    },
    Channel {
        channel: Option<Reference>,
    },
    Status {
        status: ContactStatus,
    },
}

impl Modifier {
    pub fn type_name(&self) -> &'static str {
        match self {
            Modifier::Name { .. } => "name",
            Modifier::Language { .. } => "language",
            Modifier::Timezone { .. } => "timezone",
            Modifier::Field { .. } => "field",
            Modifier::Groups { .. } => "groups",
            Modifier::Urns { .. } => "urns",
            Modifier::Channel { .. } => "channel",
            Modifier::Status { .. } => "status",
        }
    }

    /// Applies this modifier to the contact, emitting an event when state
    /// changed. Returns whether anything changed.
    pub fn apply(
        &self,
        _env: &Environment,
        assets: &SessionAssets,
        contact: &mut Contact,
        emit: &mut dyn FnMut(EventPayload),
    ) -> bool {
        match self {
            Modifier::Name { name } => {
                let name = name.clone().filter(|n| !n.is_empty());
                if contact.name != name {
                    contact.name = name.clone();
                    emit(EventPayload::ContactNameChanged { name });
                    return true;
                }
                false
            }
            Modifier::Language { language } => {
                let language = language.clone().filter(|l| !l.is_empty());
                if contact.language != language {
                    contact.language = language.clone();
                    emit(EventPayload::ContactLanguageChanged { language });
                    return true;
                }
                false
            }
            Modifier::Timezone { timezone } => {
                let timezone = timezone.clone().filter(|t| !t.is_empty());
                if contact.timezone != timezone {
                    contact.timezone = timezone.clone();
                    emit(EventPayload::ContactTimezoneChanged { timezone });
                    return true;
                }
                false
            }
            Modifier::Field { field, value } => apply_field(assets, contact, field, value, emit),
            Modifier::Groups {
                modification,
                groups,
            } => apply_groups(assets, contact, *modification, groups, emit),
            Modifier::Urns { modification, urn } => {
                apply_urns(contact, *modification, urn, emit)
            }
            Modifier::Channel { channel } => {
                let changed = contact.channel.as_ref().map(|c| &c.uuid) != channel.as_ref().map(|c| &c.uuid);
                if changed {
                    contact.channel = channel.clone();
                    if let Some(channel) = channel {
                        emit(EventPayload::ContactChannelChanged {
                            channel: channel.clone(),
                        });
                    }
                    return true;
                }
                false
            }
            Modifier::Status { status } => {
                if contact.status != *status {
                    contact.status = *status;
                    emit(EventPayload::ContactStatusChanged { status: *status });
                    return true;
                }
                false
            }
        }
    }
}

fn parse_field_value(field: &Field, raw: &str) -> FieldValue {
    let mut value = FieldValue::text_only(raw);
    match field.value_type {
        FieldType::Number => {
            value.number = raw.trim().parse::<f64>().ok();
        }
        FieldType::Datetime => {
            value.datetime = chrono::DateTime::parse_from_rfc3339(raw.trim())
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .ok();
        }
        _ => {}
    }
    value
}

fn apply_field(
    assets: &SessionAssets,
    contact: &mut Contact,
    field_ref: &Reference,
    value: &Option<String>,
    emit: &mut dyn FnMut(EventPayload),
) -> bool {
    let Some(key) = &field_ref.key else {
        return false;
    };
    let Some(field) = assets.field(key) else {
        return false;
    };

    let new_value = value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_field_value(field, v));

    let current = contact.fields.get(key);
    if current == new_value.as_ref() {
        return false;
    }

    match &new_value {
        Some(v) => {
            contact.fields.insert(key.clone(), v.clone());
        }
        None => {
            contact.fields.remove(key);
        }
    }
    emit(EventPayload::ContactFieldChanged {
        field: field.reference(),
        value: new_value,
    });
    true
}

fn apply_groups(
    assets: &SessionAssets,
    contact: &mut Contact,
    modification: GroupsModification,
    groups: &[Reference],
    emit: &mut dyn FnMut(EventPayload),
) -> bool {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for reference in groups {
        let Some(uuid) = reference.uuid else { continue };
        let Some(group) = assets.group(uuid) else {
            continue;
        };
        match modification {
            GroupsModification::Add => {
                if !contact.in_group(uuid) {
                    contact.groups.push(group.reference());
                    added.push(group.reference());
                }
            }
            GroupsModification::Remove => {
                if contact.in_group(uuid) {
                    contact.groups.retain(|g| g.uuid != Some(uuid));
                    removed.push(group.reference());
                }
            }
        }
    }

    if added.is_empty() && removed.is_empty() {
        return false;
    }
    emit(EventPayload::ContactGroupsChanged {
        groups_added: added,
        groups_removed: removed,
    });
    true
}

fn apply_urns(
    contact: &mut Contact,
    modification: UrnsModification,
    urn: &str,
    emit: &mut dyn FnMut(EventPayload),
) -> bool {
    let Ok(parsed) = Urn::parse(urn) else {
        return false;
    };

    let changed = match modification {
        UrnsModification::Append => {
            if contact.has_urn(&parsed.identity()) {
                false
            } else {
                contact.urns.push(parsed);
                true
            }
        }
        UrnsModification::Remove => {
            let before = contact.urns.len();
            let identity = parsed.identity();
            contact.urns.retain(|u| u.identity() != identity);
            contact.urns.len() != before
        }
    };

    if changed {
        emit(EventPayload::ContactUrnsChanged {
            urns: contact.urns.clone(),
        });
    }
    changed
}

const KNOWN_TYPES: &[&str] = &[
    "name", "language", "timezone", "field", "groups", "urns", "channel", "status",
];

/// Reads a modifier from its wire form, resolving asset references.
///
/// When *every* referenced asset is missing the sentinel
/// [`ModifierReadError::NoModifier`] is returned and callers drop the
/// modifier. A groups modifier with at least one resolvable group applies to
/// that subset; the unresolvable references are reported through `missing`.
pub fn read_modifier(
    data: &Json,
    assets: &SessionAssets,
    missing: &mut MissingCallback<'_>,
) -> Result<Modifier, ModifierReadError> {
    let type_name = match data.get("type") {
        Some(Json::String(s)) => s.clone(),
        Some(_) | None => return Err(ReadError::MissingType.into()),
    };
    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Err(ReadError::UnknownType(type_name).into());
    }

    let modifier: Modifier = serde_json::from_value(data.clone()).map_err(ReadError::from)?;

    match &modifier {
        Modifier::Groups {
            modification,
            groups,
        } => {
            let mut resolved = Vec::new();
            for reference in groups {
                match reference.uuid.and_then(|uuid| assets.group(uuid)) {
                    Some(group) => resolved.push(group.reference()),
                    None => missing(Dependency::new(AssetKind::Group, reference.clone())),
                }
            }
            if resolved.is_empty() {
                return Err(ModifierReadError::NoModifier);
            }
            Ok(Modifier::Groups {
                modification: *modification,
                groups: resolved,
            })
        }
        Modifier::Field { field, .. } => {
            let exists = field.key.as_deref().map(|k| assets.field(k).is_some());
            if exists != Some(true) {
                missing(Dependency::new(AssetKind::Field, field.clone()));
                return Err(ModifierReadError::NoModifier);
            }
            Ok(modifier)
        }
        Modifier::Channel {
            channel: Some(channel),
        } => {
            let exists = channel.uuid.map(|uuid| assets.channel(uuid).is_some());
            if exists != Some(true) {
                missing(Dependency::new(AssetKind::Channel, channel.clone()));
                return Err(ModifierReadError::NoModifier);
            }
            Ok(modifier)
        }
        _ => Ok(modifier),
    }
}

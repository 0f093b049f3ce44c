//! Actions that change the contact, all routed through the modifier
//! catalogue, plus explicit result saving.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{AssetKind, Dependency, Reference};
use crate::engine::RunContext;
use crate::error::ActionError;
use crate::modifiers::{GroupsModification, Modifier, UrnsModification};
use crate::runs::RunResult;

use super::Action;

/// Sets or clears a value on one of the contact's fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContactFieldAction {
    pub uuid: Uuid,
    pub field: Reference,
    #[serde(default)]
    pub value: String,
}

#[async_trait]
impl Action for SetContactFieldAction {
    fn type_name(&self) -> &'static str {
        "set_contact_field"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(AssetKind::Field, self.field.clone())]
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let exists = self
            .field
            .key
            .as_deref()
            .map(|k| ctx.assets().field(k).is_some())
            .unwrap_or(false);
        if !exists {
            let dep = Dependency::new(AssetKind::Field, self.field.clone());
            ctx.log_error(step_uuid, format!("missing dependency: {}", dep));
            return Ok(());
        }

        let value = ctx.eval_template(step_uuid, &self.value);
        let modifier = Modifier::Field {
            field: self.field.clone(),
            value: Some(value).filter(|v| !v.trim().is_empty()),
        };
        ctx.apply_modifier(step_uuid, &modifier);
        Ok(())
    }
}

/// Changes the contact's preferred language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContactLanguageAction {
    pub uuid: Uuid,
    #[serde(default)]
    pub language: String,
}

#[async_trait]
impl Action for SetContactLanguageAction {
    fn type_name(&self) -> &'static str {
        "set_contact_language"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let language = ctx.eval_template(step_uuid, &self.language);
        let modifier = Modifier::Language {
            language: Some(language.trim().to_string()).filter(|l| !l.is_empty()),
        };
        if ctx.apply_modifier(step_uuid, &modifier) {
            // the run language tracks the contact
            let flow_language = ctx.run().flow.language.clone();
            let contact_language = ctx.session.contact.language.clone();
            ctx.run_mut().language = contact_language.or(Some(flow_language));
        }
        Ok(())
    }
}

/// Changes the contact's name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContactNameAction {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: String,
}

#[async_trait]
impl Action for SetContactNameAction {
    fn type_name(&self) -> &'static str {
        "set_contact_name"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let name = ctx.eval_template(step_uuid, &self.name);
        let modifier = Modifier::Name {
            name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
        };
        ctx.apply_modifier(step_uuid, &modifier);
        Ok(())
    }
}

/// Changes the contact's timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContactTimezoneAction {
    pub uuid: Uuid,
    #[serde(default)]
    pub timezone: String,
}

#[async_trait]
impl Action for SetContactTimezoneAction {
    fn type_name(&self) -> &'static str {
        "set_contact_timezone"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let timezone = ctx.eval_template(step_uuid, &self.timezone);
        let modifier = Modifier::Timezone {
            timezone: Some(timezone.trim().to_string()).filter(|t| !t.is_empty()),
        };
        ctx.apply_modifier(step_uuid, &modifier);
        Ok(())
    }
}

/// Sets the contact's preferred channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContactChannelAction {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Reference>,
}

#[async_trait]
impl Action for SetContactChannelAction {
    fn type_name(&self) -> &'static str {
        "set_contact_channel"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.channel
            .iter()
            .map(|c| Dependency::new(AssetKind::Channel, c.clone()))
            .collect()
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        if let Some(channel) = &self.channel {
            let exists = channel
                .uuid
                .map(|uuid| ctx.assets().channel(uuid).is_some())
                .unwrap_or(false);
            if !exists {
                let dep = Dependency::new(AssetKind::Channel, channel.clone());
                ctx.log_error(step_uuid, format!("missing dependency: {}", dep));
                return Ok(());
            }
        }
        let modifier = Modifier::Channel {
            channel: self.channel.clone(),
        };
        ctx.apply_modifier(step_uuid, &modifier);
        Ok(())
    }
}

/// Adds a new URN to the contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddContactUrnAction {
    pub uuid: Uuid,
    pub scheme: String,
    pub path: String,
}

#[async_trait]
impl Action for AddContactUrnAction {
    fn type_name(&self) -> &'static str {
        "add_contact_urn"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let path = ctx.eval_template(step_uuid, &self.path);
        let path = path.trim();
        if path.is_empty() {
            ctx.log_error(step_uuid, "URN path evaluated to empty");
            return Ok(());
        }
        let modifier = Modifier::Urns {
            modification: UrnsModification::Append,
            urn: format!("{}:{}", self.scheme, path),
        };
        ctx.apply_modifier(step_uuid, &modifier);
        Ok(())
    }
}

/// Removes a URN from the contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveContactUrnAction {
    pub uuid: Uuid,
    pub scheme: String,
    pub path: String,
}

#[async_trait]
impl Action for RemoveContactUrnAction {
    fn type_name(&self) -> &'static str {
        "remove_contact_urn"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let path = ctx.eval_template(step_uuid, &self.path);
        let modifier = Modifier::Urns {
            modification: UrnsModification::Remove,
            urn: format!("{}:{}", self.scheme, path.trim()),
        };
        ctx.apply_modifier(step_uuid, &modifier);
        Ok(())
    }
}

// groups modifiers apply to the resolvable subset; each unresolvable
// reference is surfaced as a missing-dependency error event
fn apply_groups_action(
    ctx: &mut RunContext<'_>,
    step_uuid: Uuid,
    groups: &[Reference],
    modification: GroupsModification,
) {
    let assets = ctx.assets();
    let mut resolved = Vec::new();
    for reference in groups {
        match reference.uuid.and_then(|uuid| assets.group(uuid)) {
            Some(group) => resolved.push(group.reference()),
            None => {
                let dep = Dependency::new(AssetKind::Group, reference.clone());
                ctx.log_error(step_uuid, format!("missing dependency: {}", dep));
            }
        }
    }
    if resolved.is_empty() {
        return;
    }
    let modifier = Modifier::Groups {
        modification,
        groups: resolved,
    };
    ctx.apply_modifier(step_uuid, &modifier);
}

/// Adds the contact to groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddContactGroupsAction {
    pub uuid: Uuid,
    pub groups: Vec<Reference>,
}

#[async_trait]
impl Action for AddContactGroupsAction {
    fn type_name(&self) -> &'static str {
        "add_contact_groups"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.groups
            .iter()
            .map(|g| Dependency::new(AssetKind::Group, g.clone()))
            .collect()
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        apply_groups_action(ctx, step_uuid, &self.groups, GroupsModification::Add);
        Ok(())
    }
}

/// Removes the contact from groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveContactGroupsAction {
    pub uuid: Uuid,
    pub groups: Vec<Reference>,
}

#[async_trait]
impl Action for RemoveContactGroupsAction {
    fn type_name(&self) -> &'static str {
        "remove_contact_groups"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.groups
            .iter()
            .map(|g| Dependency::new(AssetKind::Group, g.clone()))
            .collect()
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        apply_groups_action(ctx, step_uuid, &self.groups, GroupsModification::Remove);
        Ok(())
    }
}

/// Saves a result on the run without routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRunResultAction {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[async_trait]
impl Action for SetRunResultAction {
    fn type_name(&self) -> &'static str {
        "set_run_result"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let value = ctx.eval_template(step_uuid, &self.value);
        let node_uuid = ctx
            .run()
            .current_step()
            .map(|s| s.node_uuid)
            .unwrap_or(self.uuid);
        let result = RunResult {
            name: self.name.clone(),
            value,
            category: self.category.clone(),
            category_localized: None,
            node_uuid,
            input: None,
            extra: None,
            created_on: ctx.now(),
        };
        ctx.save_result(step_uuid, result);
        Ok(())
    }
}

//! Shared immutable assets and typed references to them.
//!
//! Assets are registered once per session and never mutated afterwards.
//! Lookups are by UUID (flows, channels, groups, labels, templates,
//! classifiers) or by key (fields, globals). Missing references are reported
//! through a caller-supplied callback rather than failing the read.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::Flow;

/// A reference to an asset held in a flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Reference {
    pub fn by_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Reference {
            uuid: Some(uuid),
            key: None,
            name: name.into(),
        }
    }

    pub fn by_key(key: impl Into<String>, name: impl Into<String>) -> Self {
        Reference {
            uuid: None,
            key: Some(key.into()),
            name: name.into(),
        }
    }
}

/// The kinds of asset a reference can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Flow,
    Channel,
    Group,
    Field,
    Label,
    Template,
    Classifier,
    Global,
    Contact,
    User,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Flow => "flow",
            AssetKind::Channel => "channel",
            AssetKind::Group => "group",
            AssetKind::Field => "field",
            AssetKind::Label => "label",
            AssetKind::Template => "template",
            AssetKind::Classifier => "classifier",
            AssetKind::Global => "global",
            AssetKind::Contact => "contact",
            AssetKind::User => "user",
        }
    }
}

/// A dependency of an action or modifier on an asset, recorded during
/// validation. Renders as `group[uuid=…]` in error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: AssetKind,
    pub reference: Reference,
}

impl Dependency {
    pub fn new(kind: AssetKind, reference: Reference) -> Self {
        Dependency { kind, reference }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reference.uuid, &self.reference.key) {
            (Some(uuid), _) => write!(f, "{}[uuid={}]", self.kind.as_str(), uuid),
            (None, Some(key)) => write!(f, "{}[key={}]", self.kind.as_str(), key),
            (None, None) => write!(f, "{}[]", self.kind.as_str()),
        }
    }
}

/// Callback invoked for every unresolvable reference during a read.
pub type MissingCallback<'a> = dyn FnMut(Dependency) + 'a;

// ================================
// Asset types
// ================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub schemes: Vec<String>,
}

impl Channel {
    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s == scheme)
    }

    pub fn reference(&self) -> Reference {
        Reference::by_uuid(self.uuid, self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Group {
    pub fn is_dynamic(&self) -> bool {
        self.query.is_some()
    }

    pub fn reference(&self) -> Reference {
        Reference::by_uuid(self.uuid, self.name.clone())
    }
}

/// The typed interpretation of a contact field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Datetime,
    State,
    District,
    Ward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: FieldType,
}

impl Field {
    pub fn reference(&self) -> Reference {
        Reference::by_key(self.key.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub uuid: Uuid,
    pub name: String,
}

/// A pre-approved message template with per-language translations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgTemplate {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub translations: Vec<TemplateTranslation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTranslation {
    pub language: String,
    pub content: String,
    #[serde(default)]
    pub variable_count: usize,
}

impl MsgTemplate {
    /// Finds the translation for the given language, falling back to the
    /// first translation.
    pub fn translation(&self, language: &str) -> Option<&TemplateTranslation> {
        self.translations
            .iter()
            .find(|t| t.language == language)
            .or_else(|| self.translations.first())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub intents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub key: String,
    pub name: String,
    pub value: String,
}

// ================================
// Registry
// ================================

/// The typed asset registry for one session.
#[derive(Default)]
pub struct SessionAssets {
    flows: HashMap<Uuid, Arc<Flow>>,
    channels: HashMap<Uuid, Channel>,
    groups: HashMap<Uuid, Group>,
    fields: HashMap<String, Field>,
    labels: HashMap<Uuid, Label>,
    templates: HashMap<Uuid, MsgTemplate>,
    classifiers: HashMap<Uuid, Classifier>,
    globals: HashMap<String, Global>,
}

impl SessionAssets {
    pub fn builder() -> SessionAssetsBuilder {
        SessionAssetsBuilder {
            assets: SessionAssets::default(),
        }
    }

    pub fn flow(&self, uuid: Uuid) -> Option<Arc<Flow>> {
        self.flows.get(&uuid).cloned()
    }

    pub fn channel(&self, uuid: Uuid) -> Option<&Channel> {
        self.channels.get(&uuid)
    }

    pub fn group(&self, uuid: Uuid) -> Option<&Group> {
        self.groups.get(&uuid)
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn label(&self, uuid: Uuid) -> Option<&Label> {
        self.labels.get(&uuid)
    }

    pub fn template(&self, uuid: Uuid) -> Option<&MsgTemplate> {
        self.templates.get(&uuid)
    }

    pub fn classifier(&self, uuid: Uuid) -> Option<&Classifier> {
        self.classifiers.get(&uuid)
    }

    pub fn global(&self, key: &str) -> Option<&Global> {
        self.globals.get(key)
    }

    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }
}

pub struct SessionAssetsBuilder {
    assets: SessionAssets,
}

impl SessionAssetsBuilder {
    pub fn flow(mut self, flow: Flow) -> Self {
        self.assets.flows.insert(flow.uuid, Arc::new(flow));
        self
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.assets.channels.insert(channel.uuid, channel);
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.assets.groups.insert(group.uuid, group);
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.assets.fields.insert(field.key.clone(), field);
        self
    }

    pub fn label(mut self, label: Label) -> Self {
        self.assets.labels.insert(label.uuid, label);
        self
    }

    pub fn template(mut self, template: MsgTemplate) -> Self {
        self.assets.templates.insert(template.uuid, template);
        self
    }

    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.assets.classifiers.insert(classifier.uuid, classifier);
        self
    }

    pub fn global(mut self, global: Global) -> Self {
        self.assets.globals.insert(global.key.clone(), global);
        self
    }

    pub fn build(self) -> Arc<SessionAssets> {
        Arc::new(self.assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        let group_uuid = Uuid::new_v4();
        let assets = SessionAssets::builder()
            .group(Group {
                uuid: group_uuid,
                name: "Testers".into(),
                query: None,
            })
            .field(Field {
                key: "age".into(),
                name: "Age".into(),
                value_type: FieldType::Number,
            })
            .global(Global {
                key: "org_name".into(),
                name: "Org Name".into(),
                value: "Nyaruka".into(),
            })
            .build();

        assert_eq!(assets.group(group_uuid).unwrap().name, "Testers");
        assert!(assets.group(Uuid::new_v4()).is_none());
        assert_eq!(assets.field("age").unwrap().value_type, FieldType::Number);
        assert_eq!(assets.global("org_name").unwrap().value, "Nyaruka");
    }

    #[test]
    fn test_dependency_display() {
        let uuid: Uuid = "5fa51f39-76ea-421c-a71b-fe4af29b871a".parse().unwrap();
        let dep = Dependency::new(AssetKind::Group, Reference::by_uuid(uuid, "Testers"));
        assert_eq!(
            dep.to_string(),
            "group[uuid=5fa51f39-76ea-421c-a71b-fe4af29b871a]"
        );

        let dep = Dependency::new(AssetKind::Field, Reference::by_key("age", "Age"));
        assert_eq!(dep.to_string(), "field[key=age]");
    }

    #[test]
    fn test_template_translation_fallback() {
        let template = MsgTemplate {
            uuid: Uuid::new_v4(),
            name: "greeting".into(),
            translations: vec![
                TemplateTranslation {
                    language: "eng".into(),
                    content: "Hello".into(),
                    variable_count: 0,
                },
                TemplateTranslation {
                    language: "fra".into(),
                    content: "Bonjour".into(),
                    variable_count: 0,
                },
            ],
        };
        assert_eq!(template.translation("fra").unwrap().content, "Bonjour");
        assert_eq!(template.translation("spa").unwrap().content, "Hello");
    }
}

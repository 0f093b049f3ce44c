//! Contacts: the end users sessions execute on behalf of.
//!
//! While the engine runs, contact state is only mutated through the modifier
//! catalogue, which emits an event for every change.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::assets::Reference;
use crate::context::ContextObject;
use crate::values::Value;

pub const SCHEME_TEL: &str = "tel";
pub const SCHEME_MAILTO: &str = "mailto";
pub const SCHEME_TWITTERID: &str = "twitterid";
pub const SCHEME_WHATSAPP: &str = "whatsapp";
pub const SCHEME_TELEGRAM: &str = "telegram";
pub const SCHEME_VIBER: &str = "viber";

/// A typed address for a contact, e.g. `tel:+12345678900` or
/// `twitterid:54784326227#nyaruka`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urn {
    pub scheme: String,
    pub path: String,
    pub display: Option<String>,
    /// Channel this URN prefers, if any.
    pub channel: Option<Uuid>,
}

impl Urn {
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Urn {
            scheme: scheme.into(),
            path: path.into(),
            display: None,
            channel: None,
        }
    }

    /// Parses `scheme:path` with an optional `#display` suffix.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid URN: {}", s))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(format!("invalid URN: {}", s));
        }
        let (path, display) = match rest.split_once('#') {
            Some((p, d)) => (p, Some(d.to_string())),
            None => (rest, None),
        };
        Ok(Urn {
            scheme: scheme.to_string(),
            path: path.to_string(),
            display,
            channel: None,
        })
    }

    pub fn identity(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }
}

impl std::fmt::Display for Urn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.display {
            Some(d) => write!(f, "{}:{}#{}", self.scheme, self.path, d),
            None => write!(f, "{}:{}", self.scheme, self.path),
        }
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Urn::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The value of a contact field, carrying the raw text plus its typed
/// interpretations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
}

impl FieldValue {
    pub fn text_only(text: impl Into<String>) -> Self {
        FieldValue {
            text: text.into(),
            number: None,
            datetime: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Blocked,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub urns: Vec<Urn>,
    #[serde(default)]
    pub groups: Vec<Reference>,
    #[serde(default)]
    pub fields: HashMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Reference>,
    #[serde(default = "default_status")]
    pub status: ContactStatus,
}

fn default_status() -> ContactStatus {
    ContactStatus::Active
}

impl Contact {
    pub fn new(uuid: Uuid, created_on: DateTime<Utc>) -> Self {
        Contact {
            uuid,
            name: None,
            language: None,
            timezone: None,
            created_on,
            urns: Vec::new(),
            groups: Vec::new(),
            fields: HashMap::new(),
            channel: None,
            status: default_status(),
        }
    }

    /// The URN a message to this contact is sent to by default: the first in
    /// priority order.
    pub fn preferred_urn(&self) -> Option<&Urn> {
        self.urns.first()
    }

    pub fn has_urn(&self, identity: &str) -> bool {
        self.urns.iter().any(|u| u.identity() == identity)
    }

    pub fn in_group(&self, uuid: Uuid) -> bool {
        self.groups.iter().any(|g| g.uuid == Some(uuid))
    }
}

/// Expression-facing view of a contact.
pub struct ContactView<'a> {
    pub contact: &'a Contact,
}

impl ContextObject for ContactView<'_> {
    fn properties(&self) -> Vec<&'static str> {
        vec![
            "uuid", "name", "first_name", "language", "timezone", "created_on", "urns", "urn",
            "groups", "fields", "channel",
        ]
    }

    fn get(&self, key: &str) -> Option<Value> {
        let c = self.contact;
        match key.to_lowercase().as_str() {
            "uuid" => Some(Value::text(c.uuid.to_string())),
            "name" => Some(match &c.name {
                Some(n) => Value::text(n.clone()),
                None => Value::Nil,
            }),
            "first_name" => Some(match &c.name {
                Some(n) => n
                    .split_whitespace()
                    .next()
                    .map(Value::text)
                    .unwrap_or(Value::Nil),
                None => Value::Nil,
            }),
            "language" => Some(match &c.language {
                Some(l) => Value::text(l.clone()),
                None => Value::Nil,
            }),
            "timezone" => Some(match &c.timezone {
                Some(t) => Value::text(t.clone()),
                None => Value::Nil,
            }),
            "created_on" => Some(Value::DateTime(c.created_on)),
            "urns" => Some(Value::Array(
                c.urns.iter().map(|u| Value::text(u.to_string())).collect(),
            )),
            "urn" => Some(match c.preferred_urn() {
                Some(u) => Value::text(u.to_string()),
                None => Value::Nil,
            }),
            "groups" => Some(Value::Array(
                c.groups
                    .iter()
                    .map(|g| {
                        let mut map = HashMap::new();
                        if let Some(uuid) = g.uuid {
                            map.insert("uuid".to_string(), Value::text(uuid.to_string()));
                        }
                        map.insert("name".to_string(), Value::text(g.name.clone()));
                        Value::Object(map)
                    })
                    .collect(),
            )),
            "fields" => {
                let map: HashMap<String, Value> = c
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::text(v.text.clone())))
                    .collect();
                Some(Value::Object(map))
            }
            "channel" => Some(match &c.channel {
                Some(ch) => Value::text(ch.name.clone()),
                None => Value::Nil,
            }),
            _ => None,
        }
    }

    fn default_value(&self) -> Value {
        let mut map: HashMap<String, Value> = self
            .properties()
            .into_iter()
            .filter_map(|p| self.get(p).map(|v| (p.to_string(), v)))
            .collect();
        map.insert(
            "__default__".to_string(),
            match &self.contact.name {
                Some(n) => Value::text(n.clone()),
                None => Value::Nil,
            },
        );
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn test_contact() -> Contact {
        let mut contact = Contact::new(Uuid::new_v4(), Utc::now());
        contact.name = Some("Ryan Lewis".into());
        contact.language = Some("eng".into());
        contact.urns = vec![
            Urn::parse("tel:+12065551212").unwrap(),
            Urn::parse("twitterid:54784326227#nyaruka").unwrap(),
        ];
        contact
            .fields
            .insert("gender".into(), FieldValue::text_only("Male"));
        contact
    }

    #[test]
    fn test_urn_parsing() {
        let urn = Urn::parse("tel:+12065551212").unwrap();
        assert_eq!(urn.scheme, "tel");
        assert_eq!(urn.path, "+12065551212");
        assert_eq!(urn.display, None);

        let urn = Urn::parse("twitterid:54784326227#nyaruka").unwrap();
        assert_eq!(urn.display.as_deref(), Some("nyaruka"));
        assert_eq!(urn.to_string(), "twitterid:54784326227#nyaruka");
        assert_eq!(urn.identity(), "twitterid:54784326227");

        assert!(Urn::parse("no-colon").is_err());
        assert!(Urn::parse(":path").is_err());
    }

    #[test]
    fn test_contact_context_view() {
        let contact = test_contact();
        let view = ContactView { contact: &contact };

        let mut ctx = Context::new();
        ctx.put_object("contact", &view);

        assert_eq!(ctx.resolve(&["contact", "name"]), Value::text("Ryan Lewis"));
        assert_eq!(ctx.resolve(&["contact", "first_name"]), Value::text("Ryan"));
        assert_eq!(
            ctx.resolve(&["contact", "urn"]),
            Value::text("tel:+12065551212")
        );
        assert_eq!(
            ctx.resolve(&["contact", "fields", "gender"]),
            Value::text("Male")
        );
        // bare @contact renders as the name
        assert_eq!(ctx.resolve(&["contact"]).to_repr(), "Ryan Lewis");
    }

    #[test]
    fn test_serde_urns_as_strings() {
        let contact = test_contact();
        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(json["urns"][0], "tel:+12065551212");
        assert_eq!(json["urns"][1], "twitterid:54784326227#nyaruka");

        let back: Contact = serde_json::from_value(json).unwrap();
        assert_eq!(back.urns.len(), 2);
        assert_eq!(back.urns[1].display.as_deref(), Some("nyaruka"));
    }
}

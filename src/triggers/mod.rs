//! Triggers: the initial stimulus that starts a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::assets::Reference;
use crate::context::ContextObject;
use crate::error::ReadError;
use crate::events::MsgIn;
use crate::values::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub flow: Reference,
    pub triggered_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Json>,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Someone started the session explicitly.
    Manual,
    /// An inbound message started the session; the message is also the
    /// initial run input.
    Msg { msg: MsgIn },
    /// A `start_session` action in another session started this one.
    FlowAction { run_summary: Json },
    /// A campaign event fired.
    Campaign { event: Json },
}

impl Trigger {
    pub fn manual(flow: Reference, triggered_on: DateTime<Utc>) -> Self {
        Trigger {
            flow,
            triggered_on,
            params: None,
            kind: TriggerKind::Manual,
        }
    }

    pub fn msg(flow: Reference, msg: MsgIn, triggered_on: DateTime<Utc>) -> Self {
        Trigger {
            flow,
            triggered_on,
            params: None,
            kind: TriggerKind::Msg { msg },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            TriggerKind::Manual => "manual",
            TriggerKind::Msg { .. } => "msg",
            TriggerKind::FlowAction { .. } => "flow_action",
            TriggerKind::Campaign { .. } => "campaign",
        }
    }

    /// The message carried by a msg trigger.
    pub fn msg_in(&self) -> Option<&MsgIn> {
        match &self.kind {
            TriggerKind::Msg { msg } => Some(msg),
            _ => None,
        }
    }
}

const KNOWN_TYPES: &[&str] = &["manual", "msg", "flow_action", "campaign"];

/// Reads a trigger from its wire form.
pub fn read_trigger(data: &Json) -> Result<Trigger, ReadError> {
    let type_name = match data.get("type") {
        Some(Json::String(s)) => s.clone(),
        Some(_) | None => return Err(ReadError::MissingType),
    };
    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Err(ReadError::UnknownType(type_name));
    }
    Ok(serde_json::from_value(data.clone())?)
}

/// `@trigger` in expressions.
pub struct TriggerView<'a> {
    pub trigger: &'a Trigger,
}

impl ContextObject for TriggerView<'_> {
    fn properties(&self) -> Vec<&'static str> {
        vec!["type", "params"]
    }

    fn get(&self, key: &str) -> Option<Value> {
        match key.to_lowercase().as_str() {
            "type" => Some(Value::text(self.trigger.type_name())),
            "params" => Some(
                self.trigger
                    .params
                    .as_ref()
                    .map(Value::from_json)
                    .unwrap_or(Value::Nil),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_trigger_wire_format() {
        let flow = Reference::by_uuid(Uuid::new_v4(), "Registration");
        let trigger = Trigger::manual(flow, Utc::now());
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "manual");
        assert_eq!(json["flow"]["name"], "Registration");

        let back = read_trigger(&json).unwrap();
        assert_eq!(back.type_name(), "manual");
    }

    #[test]
    fn test_read_trigger_errors() {
        let err = read_trigger(&serde_json::json!({"type": "alien"})).unwrap_err();
        assert_eq!(err.to_string(), "unknown type: 'alien'");

        let err = read_trigger(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.to_string(), "field 'type' is required");
    }

    #[test]
    fn test_msg_trigger_carries_input() {
        let flow = Reference::by_uuid(Uuid::new_v4(), "Registration");
        let msg = MsgIn {
            uuid: Uuid::new_v4(),
            urn: Some("tel:+12065551212".into()),
            channel: None,
            text: "join".into(),
            attachments: Vec::new(),
        };
        let trigger = Trigger::msg(flow, msg, Utc::now());
        assert_eq!(trigger.msg_in().unwrap().text, "join");
    }
}

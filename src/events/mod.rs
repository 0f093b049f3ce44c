//! The append-only event log: every observable effect of a session, in
//! emission order. Events are small JSON documents with a stable `type` tag
//! and are never mutated once emitted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::assets::Reference;
use crate::contacts::{ContactStatus, FieldValue, Urn};
use crate::error::ReadError;

/// An outgoing message composed by a `send_msg` or IVR action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgOut {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Reference>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Reference>,
}

/// An incoming message delivered by the driver on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgIn {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Reference>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// Per-language content of a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<String>,
}

/// A classifier intent with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub confidence: f64,
}

/// A driver hint describing what kind of input a wait expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hint {
    Image,
    Audio,
    Video,
    Location,
    FixedDigits { count: usize },
    TerminatedDigits { terminated_by: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialStatus {
    Answered,
    NoAnswer,
    Busy,
    Failed,
}

/// One event on the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub created_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_uuid: Option<Uuid>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(created_on: DateTime<Utc>, step_uuid: Option<Uuid>, payload: EventPayload) -> Self {
        Event {
            created_on,
            step_uuid,
            payload,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The trigger record; always the first event on a session's log.
    SessionStarted {
        trigger_type: String,
        flow: Reference,
    },
    MsgCreated {
        msg: MsgOut,
    },
    MsgReceived {
        msg: MsgIn,
    },
    MsgWait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<Hint>,
    },
    WaitTimedOut,
    DialWait {
        urn: String,
    },
    DialEnded {
        status: DialStatus,
        #[serde(default)]
        duration_seconds: u64,
    },
    BroadcastCreated {
        translations: HashMap<String, MsgContent>,
        base_language: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        groups: Vec<Reference>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        contacts: Vec<Reference>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        urns: Vec<String>,
    },
    EmailSent {
        addresses: Vec<String>,
        subject: String,
        body: String,
    },
    IvrCreated {
        msg: MsgOut,
    },
    SessionTriggered {
        flow: Reference,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        groups: Vec<Reference>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        contacts: Vec<Reference>,
        run_summary: Json,
    },
    FlowEntered {
        flow: Reference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_run_uuid: Option<Uuid>,
    },
    FlowExited {
        flow: Reference,
        run_uuid: Uuid,
    },
    RunResultChanged {
        name: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category_localized: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra: Option<Json>,
    },
    RunExpired {
        run_uuid: Uuid,
    },
    RunInterrupted {
        run_uuid: Uuid,
    },
    ContactNameChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ContactLanguageChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    ContactTimezoneChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    ContactFieldChanged {
        field: Reference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<FieldValue>,
    },
    ContactGroupsChanged {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        groups_added: Vec<Reference>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        groups_removed: Vec<Reference>,
    },
    ContactUrnsChanged {
        urns: Vec<Urn>,
    },
    ContactChannelChanged {
        channel: Reference,
    },
    ContactStatusChanged {
        status: ContactStatus,
    },
    ContactRefreshed {
        contact: Json,
    },
    WebhookCalled {
        url: String,
        status: String,
        status_code: u16,
        elapsed_ms: u64,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        resthook: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        request: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        response: String,
    },
    ClassifierCalled {
        classifier: Reference,
        input: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        intents: Vec<Intent>,
    },
    AirtimeTransferred {
        sender: String,
        recipient: String,
        currency: String,
        desired_amount: f64,
        actual_amount: f64,
    },
    Error {
        text: String,
    },
    Failure {
        text: String,
    },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::SessionStarted { .. } => "session_started",
            EventPayload::MsgCreated { .. } => "msg_created",
            EventPayload::MsgReceived { .. } => "msg_received",
            EventPayload::MsgWait { .. } => "msg_wait",
            EventPayload::WaitTimedOut => "wait_timed_out",
            EventPayload::DialWait { .. } => "dial_wait",
            EventPayload::DialEnded { .. } => "dial_ended",
            EventPayload::BroadcastCreated { .. } => "broadcast_created",
            EventPayload::EmailSent { .. } => "email_sent",
            EventPayload::IvrCreated { .. } => "ivr_created",
            EventPayload::SessionTriggered { .. } => "session_triggered",
            EventPayload::FlowEntered { .. } => "flow_entered",
            EventPayload::FlowExited { .. } => "flow_exited",
            EventPayload::RunResultChanged { .. } => "run_result_changed",
            EventPayload::RunExpired { .. } => "run_expired",
            EventPayload::RunInterrupted { .. } => "run_interrupted",
            EventPayload::ContactNameChanged { .. } => "contact_name_changed",
            EventPayload::ContactLanguageChanged { .. } => "contact_language_changed",
            EventPayload::ContactTimezoneChanged { .. } => "contact_timezone_changed",
            EventPayload::ContactFieldChanged { .. } => "contact_field_changed",
            EventPayload::ContactGroupsChanged { .. } => "contact_groups_changed",
            EventPayload::ContactUrnsChanged { .. } => "contact_urns_changed",
            EventPayload::ContactChannelChanged { .. } => "contact_channel_changed",
            EventPayload::ContactStatusChanged { .. } => "contact_status_changed",
            EventPayload::ContactRefreshed { .. } => "contact_refreshed",
            EventPayload::WebhookCalled { .. } => "webhook_called",
            EventPayload::ClassifierCalled { .. } => "classifier_called",
            EventPayload::AirtimeTransferred { .. } => "airtime_transferred",
            EventPayload::Error { .. } => "error",
            EventPayload::Failure { .. } => "failure",
        }
    }
}

const KNOWN_TYPES: &[&str] = &[
    "session_started",
    "msg_created",
    "msg_received",
    "msg_wait",
    "wait_timed_out",
    "dial_wait",
    "dial_ended",
    "broadcast_created",
    "email_sent",
    "ivr_created",
    "session_triggered",
    "flow_entered",
    "flow_exited",
    "run_result_changed",
    "run_expired",
    "run_interrupted",
    "contact_name_changed",
    "contact_language_changed",
    "contact_timezone_changed",
    "contact_field_changed",
    "contact_groups_changed",
    "contact_urns_changed",
    "contact_channel_changed",
    "contact_status_changed",
    "contact_refreshed",
    "webhook_called",
    "classifier_called",
    "airtime_transferred",
    "error",
    "failure",
];

/// Reads an event from its wire form, producing the exact errors the format
/// promises for missing and unknown type tags.
pub fn read_event(data: &Json) -> Result<Event, ReadError> {
    let type_name = match data.get("type") {
        Some(Json::String(s)) => s.clone(),
        Some(_) | None => return Err(ReadError::MissingType),
    };
    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Err(ReadError::UnknownType(type_name));
    }
    Ok(serde_json::from_value(data.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = Event::new(
            Utc::now(),
            None,
            EventPayload::Error {
                text: "something went wrong".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["text"], "something went wrong");
        assert!(json.get("step_uuid").is_none());
    }

    #[test]
    fn test_read_event() {
        let event = read_event(&serde_json::json!({
            "type": "msg_received",
            "created_on": "2018-10-18T14:20:30.000123456Z",
            "msg": {
                "uuid": "2d611e17-fb22-457f-b802-b8f7ec5cda5b",
                "urn": "tel:+12065551212",
                "text": "I love RED!"
            }
        }))
        .unwrap();
        assert_eq!(event.type_name(), "msg_received");
        match event.payload {
            EventPayload::MsgReceived { msg } => assert_eq!(msg.text, "I love RED!"),
            _ => panic!("expected msg_received"),
        }
    }

    #[test]
    fn test_read_event_unknown_type() {
        let err = read_event(&serde_json::json!({"type": "spaceship", "created_on": "2018-10-18T14:20:30Z"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown type: 'spaceship'");
    }

    #[test]
    fn test_read_event_missing_type() {
        let err = read_event(&serde_json::json!({"created_on": "2018-10-18T14:20:30Z"})).unwrap_err();
        assert_eq!(err.to_string(), "field 'type' is required");
    }

    #[test]
    fn test_type_names_roundtrip() {
        let payloads = vec![
            EventPayload::WaitTimedOut,
            EventPayload::RunExpired {
                run_uuid: Uuid::new_v4(),
            },
            EventPayload::ContactNameChanged {
                name: Some("Bob".into()),
            },
        ];
        for payload in payloads {
            let name = payload.type_name();
            let event = Event::new(Utc::now(), None, payload);
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], name);
            let back = read_event(&json).unwrap();
            assert_eq!(back.type_name(), name);
        }
    }
}

//! Waits: the suspension points at router nodes.
//!
//! A wait begins by emitting its wait event and parking the session; the
//! driver later delivers an event which the wait either accepts (recording
//! the input on the run) or rejects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contacts::Contact;
use crate::error::ReadError;
use crate::events::{EventPayload, Hint};
use crate::runs::Input;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Wait {
    /// Waits for the next inbound message from the contact.
    Msg {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<Hint>,
    },
    /// Waits for an IVR dial to complete.
    Dial,
    /// Waits for the run to expire; used by background expirations.
    Expiration,
}

/// What a delivered event means to the pending wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Event accepted; end the wait and route.
    Accept,
    /// Event recognized but declined; drop it and keep waiting.
    Drop,
}

impl Wait {
    pub fn type_name(&self) -> &'static str {
        match self {
            Wait::Msg { .. } => "msg",
            Wait::Dial => "dial",
            Wait::Expiration => "expiration",
        }
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        match self {
            Wait::Msg {
                timeout_seconds, ..
            } => *timeout_seconds,
            _ => None,
        }
    }

    /// The event emitted when this wait begins.
    pub fn begin_event(&self, contact: &Contact) -> EventPayload {
        match self {
            Wait::Msg {
                timeout_seconds,
                hint,
            } => EventPayload::MsgWait {
                timeout_seconds: *timeout_seconds,
                hint: hint.clone(),
            },
            Wait::Dial => EventPayload::DialWait {
                urn: contact
                    .preferred_urn()
                    .map(|u| u.to_string())
                    .unwrap_or_default(),
            },
            Wait::Expiration => EventPayload::MsgWait {
                timeout_seconds: None,
                hint: None,
            },
        }
    }

    /// Whether the given resume event can end this wait.
    pub fn can_resume_with(&self, event: &EventPayload) -> Option<WaitOutcome> {
        match (self, event) {
            (Wait::Msg { .. }, EventPayload::MsgReceived { .. }) => Some(WaitOutcome::Accept),
            (Wait::Msg { timeout_seconds, .. }, EventPayload::WaitTimedOut) => {
                // a timeout only ends a wait that asked for one
                if timeout_seconds.is_some() {
                    Some(WaitOutcome::Accept)
                } else {
                    Some(WaitOutcome::Drop)
                }
            }
            (Wait::Dial, EventPayload::DialEnded { .. }) => Some(WaitOutcome::Accept),
            (Wait::Expiration, EventPayload::RunExpired { .. }) => Some(WaitOutcome::Accept),
            _ => None,
        }
    }

    /// Builds the run input recorded when this wait ends with the given
    /// event.
    pub fn create_input(
        &self,
        event: &EventPayload,
        input_uuid: Uuid,
        now: DateTime<Utc>,
    ) -> Option<Input> {
        match event {
            EventPayload::MsgReceived { msg } => Some(Input {
                uuid: input_uuid,
                type_name: "msg".to_string(),
                created_on: now,
                text: msg.text.clone(),
                urn: msg.urn.clone(),
                attachments: msg.attachments.clone(),
            }),
            EventPayload::DialEnded { status, .. } => Some(Input {
                uuid: input_uuid,
                type_name: "dial".to_string(),
                created_on: now,
                text: serde_json::to_value(status)
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default(),
                urn: None,
                attachments: Vec::new(),
            }),
            _ => None,
        }
    }
}

/// Reads a wait from its wire form.
pub fn read_wait(data: &serde_json::Value) -> Result<Wait, ReadError> {
    let type_name = match data.get("type") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(_) | None => return Err(ReadError::MissingType),
    };
    if !matches!(type_name.as_str(), "msg" | "dial" | "expiration") {
        return Err(ReadError::UnknownType(type_name));
    }
    Ok(serde_json::from_value(data.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DialStatus, MsgIn};

    fn msg_received(text: &str) -> EventPayload {
        EventPayload::MsgReceived {
            msg: MsgIn {
                uuid: Uuid::new_v4(),
                urn: Some("tel:+12065551212".into()),
                channel: None,
                text: text.into(),
                attachments: Vec::new(),
            },
        }
    }

    #[test]
    fn test_msg_wait_accepts_messages() {
        let wait = Wait::Msg {
            timeout_seconds: None,
            hint: None,
        };
        assert_eq!(
            wait.can_resume_with(&msg_received("hi")),
            Some(WaitOutcome::Accept)
        );
        assert_eq!(
            wait.can_resume_with(&EventPayload::WaitTimedOut),
            Some(WaitOutcome::Drop)
        );
        assert_eq!(
            wait.can_resume_with(&EventPayload::DialEnded {
                status: DialStatus::Answered,
                duration_seconds: 5
            }),
            None
        );
    }

    #[test]
    fn test_msg_wait_timeout_accepted_when_configured() {
        let wait = Wait::Msg {
            timeout_seconds: Some(300),
            hint: None,
        };
        assert_eq!(
            wait.can_resume_with(&EventPayload::WaitTimedOut),
            Some(WaitOutcome::Accept)
        );
    }

    #[test]
    fn test_create_input_from_msg() {
        let wait = Wait::Msg {
            timeout_seconds: None,
            hint: None,
        };
        let input = wait
            .create_input(&msg_received("I love RED!"), Uuid::new_v4(), Utc::now())
            .unwrap();
        assert_eq!(input.text, "I love RED!");
        assert_eq!(input.type_name, "msg");
        assert_eq!(input.urn.as_deref(), Some("tel:+12065551212"));
    }

    #[test]
    fn test_read_wait() {
        let wait = read_wait(&serde_json::json!({"type": "msg", "timeout_seconds": 300})).unwrap();
        assert_eq!(
            wait,
            Wait::Msg {
                timeout_seconds: Some(300),
                hint: None
            }
        );

        let err = read_wait(&serde_json::json!({"type": "nap"})).unwrap_err();
        assert_eq!(err.to_string(), "unknown type: 'nap'");

        let err = read_wait(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.to_string(), "field 'type' is required");
    }

    #[test]
    fn test_wire_format() {
        let wait = Wait::Msg {
            timeout_seconds: Some(60),
            hint: Some(Hint::Image),
        };
        let json = serde_json::to_value(&wait).unwrap();
        assert_eq!(json["type"], "msg");
        assert_eq!(json["timeout_seconds"], 60);
        assert_eq!(json["hint"]["type"], "image");
    }
}

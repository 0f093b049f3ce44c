//! The action catalogue: the side effects a node can fire.
//!
//! Actions are read polymorphically through a registry of per-type readers
//! keyed by the wire `type` tag, so test suites can register stubs without
//! touching process-wide state.

mod contact;
mod flow;
mod msg;
mod services;

pub use contact::*;
pub use flow::*;
pub use msg::*;
pub use services::*;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::assets::Dependency;
use crate::engine::RunContext;
use crate::error::{ActionError, ReadError};

/// A node-level side effect. `execute` may mutate the run's contact snapshot
/// (through modifiers), enqueue outbound work as events, or enter child
/// flows; recoverable failures become `error` events and return `Ok`.
#[async_trait]
pub trait Action: std::fmt::Debug + Send + Sync {
    fn type_name(&self) -> &'static str;

    fn uuid(&self) -> Uuid;

    /// The asset references this action depends on.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError>;
}

type ReadFn = fn(&Json) -> Result<Box<dyn Action>, ReadError>;

fn read_as<T: DeserializeOwned + Action + 'static>(data: &Json) -> Result<Box<dyn Action>, ReadError> {
    Ok(Box::new(serde_json::from_value::<T>(data.clone())?))
}

/// Registry of action readers by type tag.
pub struct ActionRegistry {
    readers: HashMap<&'static str, ReadFn>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        ActionRegistry {
            readers: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = ActionRegistry::empty();
        registry.register("send_msg", read_as::<SendMsgAction>);
        registry.register("send_broadcast", read_as::<SendBroadcastAction>);
        registry.register("send_email", read_as::<SendEmailAction>);
        registry.register("play_audio", read_as::<PlayAudioAction>);
        registry.register("say_msg", read_as::<SayMsgAction>);
        registry.register("set_contact_field", read_as::<SetContactFieldAction>);
        registry.register("set_contact_language", read_as::<SetContactLanguageAction>);
        registry.register("set_contact_name", read_as::<SetContactNameAction>);
        registry.register("set_contact_timezone", read_as::<SetContactTimezoneAction>);
        registry.register("set_contact_channel", read_as::<SetContactChannelAction>);
        registry.register("add_contact_urn", read_as::<AddContactUrnAction>);
        registry.register("remove_contact_urn", read_as::<RemoveContactUrnAction>);
        registry.register("add_contact_groups", read_as::<AddContactGroupsAction>);
        registry.register("remove_contact_groups", read_as::<RemoveContactGroupsAction>);
        registry.register("set_run_result", read_as::<SetRunResultAction>);
        registry.register("enter_flow", read_as::<EnterFlowAction>);
        registry.register("start_session", read_as::<StartSessionAction>);
        registry.register("call_webhook", read_as::<CallWebhookAction>);
        registry.register("call_classifier", read_as::<CallClassifierAction>);
        registry.register("transfer_airtime", read_as::<TransferAirtimeAction>);
        registry
    }

    /// Registers (or replaces) the reader for a type tag.
    pub fn register(&mut self, type_name: &'static str, reader: ReadFn) {
        self.readers.insert(type_name, reader);
    }

    /// Reads an action from its wire form.
    pub fn read(&self, data: &Json) -> Result<Box<dyn Action>, ReadError> {
        let type_name = match data.get("type") {
            Some(Json::String(s)) => s.clone(),
            Some(_) | None => return Err(ReadError::MissingType),
        };
        let reader = self
            .readers
            .get(type_name.as_str())
            .ok_or(ReadError::UnknownType(type_name))?;
        reader(data)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_dispatch() {
        let registry = ActionRegistry::with_builtins();

        let action = registry
            .read(&serde_json::json!({
                "type": "send_msg",
                "uuid": "ad154980-7bf7-4ab8-8728-545fd6378912",
                "text": "Hi there"
            }))
            .unwrap();
        assert_eq!(action.type_name(), "send_msg");

        let err = registry
            .read(&serde_json::json!({"type": "send_carrier_pigeon", "uuid": Uuid::new_v4()}))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown type: 'send_carrier_pigeon'");

        let err = registry.read(&serde_json::json!({"uuid": Uuid::new_v4()})).unwrap_err();
        assert_eq!(err.to_string(), "field 'type' is required");
    }

    #[test]
    fn test_register_hook_replaces_reader() {
        let mut registry = ActionRegistry::empty();
        registry.register("send_msg", read_as::<SendMsgAction>);
        assert!(registry
            .read(&serde_json::json!({
                "type": "send_msg",
                "uuid": Uuid::new_v4(),
                "text": "x"
            }))
            .is_ok());
        assert!(registry
            .read(&serde_json::json!({"type": "enter_flow", "uuid": Uuid::new_v4()}))
            .is_err());
    }
}

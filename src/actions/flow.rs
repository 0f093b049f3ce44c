//! Flow-composition actions: entering child flows and triggering sessions
//! for other contacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{AssetKind, Dependency, Reference};
use crate::engine::RunContext;
use crate::error::ActionError;
use crate::events::EventPayload;

use super::Action;

/// Enters another flow as a child run of this one. Must be the final action
/// of its node: when the child ends, the parent routes out of the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterFlowAction {
    pub uuid: Uuid,
    pub flow: Reference,
    /// A terminal enter never returns to the parent.
    #[serde(default)]
    pub terminal: bool,
}

#[async_trait]
impl Action for EnterFlowAction {
    fn type_name(&self) -> &'static str {
        "enter_flow"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(AssetKind::Flow, self.flow.clone())]
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let flow = self.flow.uuid.and_then(|uuid| ctx.assets().flow(uuid));
        let Some(flow) = flow else {
            let dep = Dependency::new(AssetKind::Flow, self.flow.clone());
            ctx.log_error(step_uuid, format!("missing dependency: {}", dep));
            return Ok(());
        };

        let engine = ctx.engine;
        let run_idx = ctx.run_idx;
        engine
            .enter_child_flow(&mut *ctx.session, run_idx, flow)
            .await?;
        Ok(())
    }
}

/// Triggers a new session for other contacts or groups; the driver consumes
/// the emitted event to start it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionAction {
    pub uuid: Uuid,
    pub flow: Reference,
    #[serde(default)]
    pub groups: Vec<Reference>,
    #[serde(default)]
    pub contacts: Vec<Reference>,
}

#[async_trait]
impl Action for StartSessionAction {
    fn type_name(&self) -> &'static str {
        "start_session"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        let mut deps = vec![Dependency::new(AssetKind::Flow, self.flow.clone())];
        deps.extend(
            self.groups
                .iter()
                .map(|g| Dependency::new(AssetKind::Group, g.clone())),
        );
        deps
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let flow_exists = self
            .flow
            .uuid
            .map(|uuid| ctx.assets().flow(uuid).is_some())
            .unwrap_or(false);
        if !flow_exists {
            let dep = Dependency::new(AssetKind::Flow, self.flow.clone());
            ctx.log_error(step_uuid, format!("missing dependency: {}", dep));
            return Ok(());
        }

        // snapshot of the originating run, consumed by the triggered session
        let run = ctx.run();
        let run_summary = serde_json::json!({
            "uuid": run.uuid,
            "flow": {"uuid": run.flow.uuid, "name": &run.flow.name},
            "contact": &ctx.session.contact,
            "status": run.status,
            "results": &run.results,
        });

        ctx.emit(
            Some(step_uuid),
            EventPayload::SessionTriggered {
                flow: self.flow.clone(),
                groups: self.groups.clone(),
                contacts: self.contacts.clone(),
                run_summary,
            },
        );
        Ok(())
    }
}

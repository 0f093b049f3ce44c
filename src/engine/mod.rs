//! The session execution engine.
//!
//! The engine walks flow graphs one node at a time, executing actions,
//! routing through exits, and parking the session whenever a wait needs
//! outside input. `start` and `resume` are the only entry points; both run
//! to the next wait (or to completion) and return control to the caller.

mod context;
mod runtime;
mod session;

pub use context::{build_run_context, RunContext};
pub use runtime::{
    FakeTimeProvider, FakeUuidGenerator, RealTimeProvider, RealUuidGenerator, TimeProvider,
    UuidGenerator,
};
pub use session::{PendingWait, Session, SessionStatus};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{Reference, SessionAssets};
use crate::contacts::Contact;
use crate::definition::{Flow, Node};
use crate::envs::Environment;
use crate::error::{ActionError, SessionError};
use crate::events::{Event, EventPayload};
use crate::routers::RouteContext;
use crate::runs::{Input, Run, RunResult, RunStatus};
use crate::services::{AirtimeService, ClassifierService, WebhookService};
use crate::triggers::Trigger;
use crate::waits::WaitOutcome;

use session::new_event;

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on steps in one continuation, a backstop behind loop
    /// detection.
    pub max_steps: usize,
    pub webhook_max_body_bytes: usize,
    pub webhook_timeout_secs: u64,
    pub classifier_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: 100,
            webhook_max_body_bytes: 10 * 1024,
            webhook_timeout_secs: 15,
            classifier_timeout_secs: 30,
        }
    }
}

/// What entering a node concluded.
enum NodeOutcome {
    /// Keep walking to this destination (or complete when empty).
    Advance(Option<Uuid>),
    /// The session is parked on a wait.
    Suspend,
    /// The run was terminated.
    Terminated,
}

pub struct Engine {
    config: EngineConfig,
    webhook: Option<Arc<dyn WebhookService>>,
    classifier: Option<Arc<dyn ClassifierService>>,
    airtime: Option<Arc<dyn AirtimeService>>,
    time: Arc<dyn TimeProvider>,
    uuids: Arc<dyn UuidGenerator>,
    rng: Mutex<StdRng>,
}

pub struct EngineBuilder {
    config: EngineConfig,
    webhook: Option<Arc<dyn WebhookService>>,
    classifier: Option<Arc<dyn ClassifierService>>,
    airtime: Option<Arc<dyn AirtimeService>>,
    time: Arc<dyn TimeProvider>,
    uuids: Arc<dyn UuidGenerator>,
    rng_seed: Option<u64>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            webhook: None,
            classifier: None,
            airtime: None,
            time: Arc::new(RealTimeProvider),
            uuids: Arc::new(RealUuidGenerator),
            rng_seed: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_webhook_service(mut self, service: Arc<dyn WebhookService>) -> Self {
        self.webhook = Some(service);
        self
    }

    pub fn with_classifier_service(mut self, service: Arc<dyn ClassifierService>) -> Self {
        self.classifier = Some(service);
        self
    }

    pub fn with_airtime_service(mut self, service: Arc<dyn AirtimeService>) -> Self {
        self.airtime = Some(service);
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn with_uuid_generator(mut self, uuids: Arc<dyn UuidGenerator>) -> Self {
        self.uuids = uuids;
        self
    }

    /// Seeds the router RNG for reproducible random routing.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Engine {
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Engine {
            config: self.config,
            webhook: self.webhook,
            classifier: self.classifier,
            airtime: self.airtime,
            time: self.time,
            uuids: self.uuids,
            rng: Mutex::new(rng),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn webhook_service(&self) -> Option<Arc<dyn WebhookService>> {
        self.webhook.clone()
    }

    pub fn classifier_service(&self) -> Option<Arc<dyn ClassifierService>> {
        self.classifier.clone()
    }

    pub fn airtime_service(&self) -> Option<Arc<dyn AirtimeService>> {
        self.airtime.clone()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub(crate) fn new_uuid(&self) -> Uuid {
        self.uuids.next()
    }

    /// Starts a new session for the trigger's flow. The contact is deep
    /// cloned so the caller's copy is never aliased.
    pub async fn start(
        &self,
        assets: Arc<SessionAssets>,
        trigger: Trigger,
        environment: Environment,
        contact: &Contact,
    ) -> Result<Session, SessionError> {
        let flow_uuid = trigger.flow.uuid.ok_or_else(|| {
            crate::error::ReadError::invalid("trigger", "flow reference requires a uuid")
        })?;
        let flow = assets
            .flow(flow_uuid)
            .ok_or(SessionError::MissingFlow(flow_uuid))?;

        let mut session = Session::new(
            self.new_uuid(),
            flow.flow_type,
            environment,
            contact.clone(),
            trigger,
            assets.clone(),
        );

        tracing::debug!(session = %session.uuid, flow = %flow.name, "session starting");

        session.push_event(new_event(
            self.now(),
            None,
            EventPayload::SessionStarted {
                trigger_type: session.trigger.type_name().to_string(),
                flow: Reference::by_uuid(flow.uuid, flow.name.clone()),
            },
        ));

        flow.check_dependencies(&assets, &mut |dep| {
            tracing::warn!(dependency = %dep, "missing asset reference");
        });

        let run_idx = self.create_run(&mut session, flow.clone(), None);

        // an empty flow is valid but completes immediately, with no events
        // beyond the trigger
        let Some(entry) = flow.entry_node() else {
            let now = self.now();
            session.runs[run_idx].exit(RunStatus::Completed, now);
            self.finalize(&mut session);
            return Ok(session);
        };

        self.emit_flow_entered(&mut session, run_idx);
        let entry_uuid = entry.uuid;
        self.continue_run(&mut session, run_idx, Some(entry_uuid), None)
            .await?;
        self.finalize(&mut session);
        Ok(session)
    }

    /// Resumes a waiting session with the given events, in order.
    pub async fn resume(
        &self,
        session: &mut Session,
        events: Vec<Event>,
    ) -> Result<(), SessionError> {
        for event in events {
            if session.status != SessionStatus::Waiting {
                return Err(SessionError::NotWaiting);
            }
            let Some(pending) = session.pending_wait.clone() else {
                return Err(SessionError::Resume(
                    "session is waiting but has no pending wait".into(),
                ));
            };

            match pending.wait.can_resume_with(&event.payload) {
                Some(WaitOutcome::Accept) => {
                    self.resume_wait(session, event).await?;
                    self.unwind(session).await?;
                }
                Some(WaitOutcome::Drop) => {
                    tracing::debug!(event = event.type_name(), "wait declined event, dropped");
                }
                None => {
                    // a run expiration that the wait doesn't consume expires
                    // the waiting run
                    if matches!(event.payload, EventPayload::RunExpired { .. }) {
                        self.expire_waiting_run(session, event).await?;
                        self.unwind(session).await?;
                    } else {
                        let text = format!(
                            "event of type '{}' cannot resume a waiting {} wait",
                            event.type_name(),
                            pending.wait.type_name()
                        );
                        let step_uuid = session
                            .run_index(pending.run_uuid)
                            .and_then(|idx| session.runs[idx].current_step())
                            .map(|s| s.uuid);
                        session.push_event(new_event(
                            self.now(),
                            step_uuid,
                            EventPayload::Error { text },
                        ));
                    }
                }
            }
        }
        self.finalize(session);
        Ok(())
    }

    // ---- internals ----

    fn create_run(
        &self,
        session: &mut Session,
        flow: Arc<Flow>,
        parent_uuid: Option<Uuid>,
    ) -> usize {
        let now = self.now();
        let mut run = Run::new(self.new_uuid(), flow.clone(), parent_uuid, now);

        // run language comes from the contact, falling back to the flow base
        run.language = session
            .contact
            .language
            .clone()
            .or_else(|| Some(flow.language.clone()));

        if parent_uuid.is_none() {
            run.extra = session.trigger.params.clone();
            if let Some(msg) = session.trigger.msg_in() {
                run.input = Some(Input {
                    uuid: msg.uuid,
                    type_name: "msg".to_string(),
                    created_on: now,
                    text: msg.text.clone(),
                    urn: msg.urn.clone(),
                    attachments: msg.attachments.clone(),
                });
            }
        }

        session.runs.push(run);
        session.runs.len() - 1
    }

    fn emit_flow_entered(&self, session: &mut Session, run_idx: usize) {
        let run = &session.runs[run_idx];
        let payload = EventPayload::FlowEntered {
            flow: Reference::by_uuid(run.flow.uuid, run.flow.name.clone()),
            parent_run_uuid: run.parent_uuid,
        };
        session.push_event(new_event(self.now(), None, payload));
    }

    /// Walks the run from `destination` until it waits, completes or errors.
    /// The visited set lives for exactly one continuation, so it resets at
    /// every wait.
    pub(crate) async fn continue_run(
        &self,
        session: &mut Session,
        run_idx: usize,
        mut destination: Option<Uuid>,
        mut incoming: Option<Event>,
    ) -> Result<(), SessionError> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut steps = 0usize;

        while let Some(dest) = destination {
            steps += 1;
            if steps > self.config.max_steps {
                let text = format!("step limit of {} exceeded", self.config.max_steps);
                self.log_step_error(session, run_idx, text.clone());
                self.exit_run(session, run_idx, RunStatus::Errored, Some(text));
                return Ok(());
            }

            if visited.contains(&dest) {
                let text = format!(
                    "flow loop detected, stopping execution before entering '{}'",
                    dest
                );
                self.log_step_error(session, run_idx, text.clone());
                self.exit_run(session, run_idx, RunStatus::Errored, Some(text));
                return Ok(());
            }

            let flow = session.runs[run_idx].flow.clone();
            if flow.node(dest).is_none() {
                let text = format!("unable to find destination '{}'", dest);
                self.log_step_error(session, run_idx, text.clone());
                self.exit_run(session, run_idx, RunStatus::Errored, Some(text));
                return Ok(());
            }

            visited.insert(dest);
            let outcome = self
                .enter_node(session, run_idx, dest, incoming.take())
                .await?;

            match outcome {
                NodeOutcome::Advance(next) => destination = next,
                NodeOutcome::Suspend | NodeOutcome::Terminated => return Ok(()),
            }
        }

        // no wait and no destination means the run completed
        if session.runs[run_idx].status == RunStatus::Active {
            self.exit_run(session, run_idx, RunStatus::Completed, None);
        }
        Ok(())
    }

    async fn enter_node(
        &self,
        session: &mut Session,
        run_idx: usize,
        node_uuid: Uuid,
        incoming: Option<Event>,
    ) -> Result<NodeOutcome, SessionError> {
        let flow = session.runs[run_idx].flow.clone();
        let node = flow.node(node_uuid).expect("checked by caller");

        let now = self.now();
        let step_uuid = self.new_uuid();
        session.runs[run_idx].create_step(step_uuid, node_uuid, now);

        tracing::debug!(node = %node_uuid, step = %step_uuid, "entering node");

        if let Some(mut event) = incoming {
            event.step_uuid = Some(step_uuid);
            session.push_event(event);
        }

        // execute the node's actions in order
        for action in &node.actions {
            let mut ctx = RunContext {
                engine: self,
                session: &mut *session,
                run_idx,
            };
            if let Err(ActionError::Fatal(text)) = action.execute(&mut ctx, step_uuid).await {
                self.log_step_error(session, run_idx, text.clone());
                self.exit_run(session, run_idx, RunStatus::Errored, Some(text));
                return Ok(NodeOutcome::Terminated);
            }
            // a child flow entered by the action may have parked the session
            if session.status == SessionStatus::Waiting {
                return Ok(NodeOutcome::Suspend);
            }
            if session.runs[run_idx].status.is_terminal() {
                return Ok(NodeOutcome::Terminated);
            }
        }

        if let Some(wait) = node.wait() {
            let payload = wait.begin_event(&session.contact);
            session.push_event(new_event(self.now(), Some(step_uuid), payload));
            session.runs[run_idx].status = RunStatus::Waiting;
            session.status = SessionStatus::Waiting;
            session.pending_wait = Some(PendingWait {
                run_uuid: session.runs[run_idx].uuid,
                node_uuid,
                wait: wait.clone(),
            });
            return Ok(NodeOutcome::Suspend);
        }

        Ok(NodeOutcome::Advance(self.pick_exit(
            session, run_idx, node, step_uuid,
        )))
    }

    /// Routes out of a node: asks the router (or the first exit) for the
    /// exit, saves the router's result if it names one, stamps the step, and
    /// returns the destination.
    fn pick_exit(
        &self,
        session: &mut Session,
        run_idx: usize,
        node: &Node,
        step_uuid: Uuid,
    ) -> Option<Uuid> {
        let mut exit_uuid = None;

        if let Some(router) = &node.router {
            let (route, errors) = {
                let context = build_run_context(session, run_idx);
                let run = &session.runs[run_idx];
                let languages = match &run.language {
                    Some(lang) if *lang != run.flow.language => vec![lang.clone()],
                    _ => Vec::new(),
                };
                let mut rng = self.rng.lock();
                let mut route_ctx = RouteContext {
                    context: &context,
                    localization: &run.flow.localization,
                    languages,
                    env: &session.environment,
                    rng: &mut *rng,
                };
                router.pick_route(&mut route_ctx)
            };

            for error in errors {
                self.log_step_error(session, run_idx, error);
            }

            if let Some(name) = &router.result_name {
                let category = Some(route.category_name.clone()).filter(|c| !c.is_empty());
                let result = RunResult {
                    name: name.clone(),
                    value: route.value.clone(),
                    category: category.clone(),
                    category_localized: Some(route.category_localized.clone())
                        .filter(|c| !c.is_empty() && Some(c) != category.as_ref()),
                    node_uuid: node.uuid,
                    input: Some(route.input.clone()).filter(|i| !i.is_empty()),
                    extra: route.extra.clone(),
                    created_on: self.now(),
                };
                session.push_event(new_event(
                    self.now(),
                    Some(step_uuid),
                    EventPayload::RunResultChanged {
                        name: result.name.clone(),
                        value: result.value.clone(),
                        category: result.category.clone(),
                        category_localized: result.category_localized.clone(),
                        input: result.input.clone(),
                        extra: result.extra.clone(),
                    },
                ));
                session.runs[run_idx].results.save(result);
            }

            exit_uuid = route.exit_uuid;
        } else if let Some(first) = node.exits.first() {
            // no router, the first exit is taken unconditionally
            exit_uuid = Some(first.uuid);
        }

        let destination = exit_uuid.and_then(|uuid| {
            if let Some(step) = session.runs[run_idx].current_step_mut() {
                step.leave(uuid);
            }
            node.exit(uuid).and_then(|e| e.destination_uuid)
        });

        destination
    }

    /// Enters a child flow from the current run, walking it until it waits
    /// or ends. Called by flow-entering actions.
    pub(crate) async fn enter_child_flow(
        &self,
        session: &mut Session,
        parent_idx: usize,
        flow: Arc<Flow>,
    ) -> Result<(), ActionError> {
        let parent_uuid = session.runs[parent_idx].uuid;
        let child_idx = self.create_run(session, flow.clone(), Some(parent_uuid));

        let Some(entry) = flow.entry_node() else {
            let now = self.now();
            session.runs[child_idx].exit(RunStatus::Completed, now);
            return Ok(());
        };

        self.emit_flow_entered(session, child_idx);
        let entry_uuid = entry.uuid;
        self.continue_run(session, child_idx, Some(entry_uuid), None)
            .await
            .map_err(|e| ActionError::Fatal(e.to_string()))?;

        // a child failure propagates to the parent
        if session.runs[child_idx].status == RunStatus::Errored {
            return Err(ActionError::Fatal(format!(
                "child flow '{}' ended in failure",
                flow.name
            )));
        }
        Ok(())
    }

    async fn resume_wait(&self, session: &mut Session, event: Event) -> Result<(), SessionError> {
        let pending = session
            .pending_wait
            .take()
            .expect("checked by caller");

        let run_idx = session
            .run_index(pending.run_uuid)
            .ok_or(SessionError::OrphanRun(pending.run_uuid))?;
        let step_uuid = session.runs[run_idx]
            .current_step()
            .map(|s| s.uuid)
            .ok_or(SessionError::NoResumableRun)?;

        // log the resume event against the waiting step
        let mut event = event;
        event.step_uuid = Some(step_uuid);
        let payload = event.payload.clone();
        session.push_event(event);

        let now = self.now();
        if let Some(input) = pending.wait.create_input(&payload, self.new_uuid(), now) {
            session.runs[run_idx].input = Some(input);
        }
        session.runs[run_idx].status = RunStatus::Active;
        session.status = SessionStatus::Active;

        let flow = session.runs[run_idx].flow.clone();
        let Some(node) = flow.node(pending.node_uuid) else {
            let text = format!(
                "cannot resume at node '{}' that no longer exists",
                pending.node_uuid
            );
            self.log_step_error(session, run_idx, text.clone());
            self.exit_run(session, run_idx, RunStatus::Errored, Some(text));
            return Ok(());
        };

        // the wait no longer existing on the node is a fatal run error
        if node.wait().is_none() {
            let text = format!(
                "cannot resume at node '{}' which no longer contains a wait",
                pending.node_uuid
            );
            self.log_step_error(session, run_idx, text.clone());
            self.exit_run(session, run_idx, RunStatus::Errored, Some(text));
            return Ok(());
        }

        let destination = self.pick_exit(session, run_idx, node, step_uuid);
        self.continue_run(session, run_idx, destination, None).await
    }

    async fn expire_waiting_run(
        &self,
        session: &mut Session,
        event: Event,
    ) -> Result<(), SessionError> {
        let pending = session
            .pending_wait
            .take()
            .expect("checked by caller");
        let run_idx = session
            .run_index(pending.run_uuid)
            .ok_or(SessionError::OrphanRun(pending.run_uuid))?;

        let step_uuid = session.runs[run_idx].current_step().map(|s| s.uuid);
        let mut event = event;
        event.step_uuid = step_uuid;
        session.push_event(event);

        session.status = SessionStatus::Active;
        self.exit_run(session, run_idx, RunStatus::Expired, None);
        Ok(())
    }

    /// Resumes parked parents of completed child runs until the session
    /// waits again or the trunk ends.
    async fn unwind(&self, session: &mut Session) -> Result<(), SessionError> {
        loop {
            if session.status == SessionStatus::Waiting {
                return Ok(());
            }

            // a terminal child whose parent is still parked on its
            // flow-entering node
            let Some((parent_idx, parent_node_uuid, child_status)) = session
                .runs
                .iter()
                .filter(|r| r.status.is_terminal())
                .filter_map(|child| {
                    let parent_uuid = child.parent_uuid?;
                    let parent_idx = session.run_index(parent_uuid)?;
                    let parent = &session.runs[parent_idx];
                    if parent.status != RunStatus::Active {
                        return None;
                    }
                    let step = parent.current_step()?;
                    if step.exit_uuid.is_some() {
                        return None;
                    }
                    Some((parent_idx, step.node_uuid, child.status))
                })
                .next()
            else {
                return Ok(());
            };

            // failures and expirations propagate upward instead of routing
            match child_status {
                RunStatus::Errored => {
                    let text = "child flow ended in failure".to_string();
                    self.log_step_error(session, parent_idx, text.clone());
                    self.exit_run(session, parent_idx, RunStatus::Errored, Some(text));
                    continue;
                }
                RunStatus::Expired => {
                    self.exit_run(session, parent_idx, RunStatus::Expired, None);
                    continue;
                }
                _ => {}
            }

            let flow = session.runs[parent_idx].flow.clone();
            let Some(node) = flow.node(parent_node_uuid) else {
                let text = format!("unable to find destination '{}'", parent_node_uuid);
                self.log_step_error(session, parent_idx, text.clone());
                self.exit_run(session, parent_idx, RunStatus::Errored, Some(text));
                continue;
            };

            let step_uuid = session.runs[parent_idx]
                .current_step()
                .map(|s| s.uuid)
                .expect("parked parent has a step");
            let destination = self.pick_exit(session, parent_idx, node, step_uuid);
            self.continue_run(session, parent_idx, destination, None)
                .await?;
        }
    }

    /// Terminates a run with the given status, emitting its terminal event.
    fn exit_run(
        &self,
        session: &mut Session,
        run_idx: usize,
        status: RunStatus,
        reason: Option<String>,
    ) {
        let now = self.now();
        session.runs[run_idx].exit(status, now);
        let run = &session.runs[run_idx];
        let run_uuid = run.uuid;
        let flow_ref = Reference::by_uuid(run.flow.uuid, run.flow.name.clone());
        let step_uuid = run.current_step().map(|s| s.uuid);

        let payload = match status {
            RunStatus::Completed => EventPayload::FlowExited {
                flow: flow_ref,
                run_uuid,
            },
            RunStatus::Expired => EventPayload::RunExpired { run_uuid },
            RunStatus::Interrupted => EventPayload::RunInterrupted { run_uuid },
            RunStatus::Errored => EventPayload::Failure {
                text: reason.unwrap_or_else(|| "run ended in failure".to_string()),
            },
            RunStatus::Active | RunStatus::Waiting => return,
        };
        session.push_event(new_event(now, step_uuid, payload));
    }

    fn log_step_error(&self, session: &mut Session, run_idx: usize, text: String) {
        tracing::warn!(%text, "run error");
        let step_uuid = session.runs[run_idx].current_step().map(|s| s.uuid);
        session.push_event(new_event(self.now(), step_uuid, EventPayload::Error { text }));
    }

    /// Derives the session status from its runs and pending wait.
    fn finalize(&self, session: &mut Session) {
        if session.pending_wait.is_some() {
            session.status = SessionStatus::Waiting;
            return;
        }
        session.status = match session.runs.first().map(|r| r.status) {
            Some(RunStatus::Errored) => SessionStatus::Errored,
            _ => SessionStatus::Completed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.webhook_max_body_bytes, 10 * 1024);
        assert_eq!(config.webhook_timeout_secs, 15);
        assert_eq!(config.classifier_timeout_secs, 30);
    }

    #[test]
    fn test_engine_config_serde() {
        let json = serde_json::json!({
            "max_steps": 50,
            "webhook_max_body_bytes": 2048,
            "webhook_timeout_secs": 5,
            "classifier_timeout_secs": 10
        });
        let config: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.webhook_max_body_bytes, 2048);
    }

    #[test]
    fn test_builder_wires_providers() {
        let engine = Engine::builder()
            .with_time_provider(Arc::new(FakeTimeProvider::default()))
            .with_uuid_generator(Arc::new(FakeUuidGenerator::new()))
            .with_rng_seed(7)
            .build();
        assert_eq!(engine.now(), engine.now());
        assert_eq!(
            engine.new_uuid().to_string(),
            "00000000-0000-4000-8000-000000000000"
        );
        assert!(engine.webhook_service().is_none());
    }
}

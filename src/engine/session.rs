//! The session: the top-level container for one contact's execution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::assets::SessionAssets;
use crate::contacts::Contact;
use crate::definition::FlowType;
use crate::envs::Environment;
use crate::error::SessionError;
use crate::events::{Event, EventPayload};
use crate::runs::{Run, RunEnvelope};
use crate::triggers::Trigger;
use crate::waits::Wait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
    Completed,
    Errored,
}

/// The wait the session is parked on, recording which run and node own it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWait {
    pub run_uuid: Uuid,
    pub node_uuid: Uuid,
    pub wait: Wait,
}

pub struct Session {
    pub uuid: Uuid,
    pub flow_type: FlowType,
    pub environment: Environment,
    pub contact: Contact,
    pub trigger: Trigger,
    pub runs: Vec<Run>,
    pub status: SessionStatus,
    pub pending_wait: Option<PendingWait>,
    pub assets: Arc<SessionAssets>,
    events: Vec<Event>,
}

impl Session {
    pub fn new(
        uuid: Uuid,
        flow_type: FlowType,
        environment: Environment,
        contact: Contact,
        trigger: Trigger,
        assets: Arc<SessionAssets>,
    ) -> Self {
        Session {
            uuid,
            flow_type,
            environment,
            contact,
            trigger,
            runs: Vec::new(),
            status: SessionStatus::Active,
            pending_wait: None,
            assets,
            events: Vec::new(),
        }
    }

    /// Appends an event to the log, clamping `created_on` so the log stays
    /// non-decreasing.
    pub fn push_event(&mut self, mut event: Event) {
        if let Some(last) = self.events.last() {
            if event.created_on < last.created_on {
                event.created_on = last.created_on;
            }
        }
        tracing::debug!(event = event.type_name(), "event emitted");
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The run currently executing: the one owning the pending wait when
    /// waiting, otherwise the deepest non-terminal run.
    pub fn current_run_index(&self) -> Option<usize> {
        if let Some(wait) = &self.pending_wait {
            return self.run_index(wait.run_uuid);
        }
        self.runs.iter().rposition(|r| !r.status.is_terminal())
    }

    pub fn run_index(&self, uuid: Uuid) -> Option<usize> {
        self.runs.iter().position(|r| r.uuid == uuid)
    }

    /// The most recently created child of the given run, if any.
    pub fn child_run_of(&self, uuid: Uuid) -> Option<&Run> {
        self.runs
            .iter()
            .rev()
            .find(|r| r.parent_uuid == Some(uuid))
    }

    pub fn parent_run_of(&self, uuid: Uuid) -> Option<&Run> {
        let run = self.runs.iter().find(|r| r.uuid == uuid)?;
        let parent_uuid = run.parent_uuid?;
        self.runs.iter().find(|r| r.uuid == parent_uuid)
    }

    /// Snapshots this session for persistence. The event log is not part of
    /// the snapshot: events are handed to the driver as they are emitted.
    pub fn to_json(&self) -> Json {
        let envelope = SessionEnvelope {
            uuid: self.uuid,
            flow_type: self.flow_type,
            environment: self.environment.clone(),
            trigger: self.trigger.clone(),
            contact: self.contact.clone(),
            runs: self.runs.iter().map(|r| r.to_envelope()).collect(),
            status: self.status,
            wait: self.pending_wait.clone(),
        };
        serde_json::to_value(&envelope).expect("session serializes")
    }

    /// Rebuilds a session from its snapshot, re-resolving each run's flow
    /// from the assets. A run whose flow is gone is a fatal hydration error.
    pub fn from_json(data: &Json, assets: Arc<SessionAssets>) -> Result<Session, SessionError> {
        let envelope: SessionEnvelope =
            serde_json::from_value(data.clone()).map_err(crate::error::ReadError::from)?;

        let mut runs = Vec::with_capacity(envelope.runs.len());
        for run_env in envelope.runs {
            let flow = assets
                .flow(run_env.flow_uuid)
                .ok_or(SessionError::MissingFlow(run_env.flow_uuid))?;
            runs.push(Run::from_envelope(run_env, flow));
        }

        // a pending wait must belong to a run of this session
        if let Some(wait) = &envelope.wait {
            if !runs.iter().any(|r| r.uuid == wait.run_uuid) {
                return Err(SessionError::OrphanRun(wait.run_uuid));
            }
        }

        Ok(Session {
            uuid: envelope.uuid,
            flow_type: envelope.flow_type,
            environment: envelope.environment,
            contact: envelope.contact,
            trigger: envelope.trigger,
            runs,
            status: envelope.status,
            pending_wait: envelope.wait,
            assets,
            events: Vec::new(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SessionEnvelope {
    uuid: Uuid,
    #[serde(rename = "type")]
    flow_type: FlowType,
    environment: Environment,
    trigger: Trigger,
    contact: Contact,
    runs: Vec<RunEnvelope>,
    status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wait: Option<PendingWait>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uuid", &self.uuid)
            .field("status", &self.status)
            .field("runs", &self.runs.len())
            .field("events", &self.events.len())
            .finish()
    }
}

/// Helper used by the engine to stamp events.
pub fn new_event(
    created_on: chrono::DateTime<chrono::Utc>,
    step_uuid: Option<Uuid>,
    payload: EventPayload,
) -> Event {
    Event::new(created_on, step_uuid, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Reference;
    use crate::definition::Flow;
    use chrono::{TimeZone, Utc};

    fn test_session() -> (Session, Arc<SessionAssets>) {
        let flow_uuid = Uuid::new_v4();
        let assets = SessionAssets::builder()
            .flow(Flow::empty(flow_uuid, "Test", "eng"))
            .build();
        let now = Utc.with_ymd_and_hms(2018, 4, 11, 18, 24, 30).unwrap();
        let contact = Contact::new(Uuid::new_v4(), now);
        let trigger = Trigger::manual(Reference::by_uuid(flow_uuid, "Test"), now);
        let session = Session::new(
            Uuid::new_v4(),
            FlowType::Messaging,
            Environment::default(),
            contact,
            trigger,
            assets.clone(),
        );
        (session, assets)
    }

    #[test]
    fn test_event_order_clamped() {
        let (mut session, _) = test_session();
        let later = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();

        session.push_event(Event::new(
            later,
            None,
            EventPayload::Error { text: "a".into() },
        ));
        session.push_event(Event::new(
            earlier,
            None,
            EventPayload::Error { text: "b".into() },
        ));

        let events = session.events();
        assert!(events[1].created_on >= events[0].created_on);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (mut session, assets) = test_session();
        let flow = assets.flow(session.trigger.flow.uuid.unwrap()).unwrap();
        let now = Utc.with_ymd_and_hms(2018, 4, 11, 18, 24, 30).unwrap();
        session.runs.push(Run::new(Uuid::new_v4(), flow, None, now));

        let snapshot = session.to_json();
        let rebuilt = Session::from_json(&snapshot, assets).unwrap();
        assert_eq!(rebuilt.uuid, session.uuid);
        assert_eq!(rebuilt.runs.len(), 1);
        assert_eq!(rebuilt.to_json(), snapshot);
    }

    #[test]
    fn test_hydrate_missing_flow_fails() {
        let (mut session, _) = test_session();
        let missing_flow = Arc::new(Flow::empty(Uuid::new_v4(), "Gone", "eng"));
        let now = Utc::now();
        session
            .runs
            .push(Run::new(Uuid::new_v4(), missing_flow, None, now));

        let snapshot = session.to_json();
        let empty_assets = SessionAssets::builder().build();
        let err = Session::from_json(&snapshot, empty_assets).unwrap_err();
        assert!(matches!(err, SessionError::MissingFlow(_)));
    }
}

//! Per-flow execution state: runs, their steps and captured results.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::context::ContextObject;
use crate::definition::Flow;
use crate::utils::snakify;
use crate::values::Value;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Waiting,
    Completed,
    Errored,
    Expired,
    Interrupted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Active | RunStatus::Waiting)
    }
}

/// A visit to one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub uuid: Uuid,
    pub node_uuid: Uuid,
    pub arrived_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_uuid: Option<Uuid>,
}

impl Step {
    pub fn new(uuid: Uuid, node_uuid: Uuid, arrived_on: DateTime<Utc>) -> Self {
        Step {
            uuid,
            node_uuid,
            arrived_on,
            exit_uuid: None,
        }
    }

    pub fn leave(&mut self, exit_uuid: Uuid) {
        self.exit_uuid = Some(exit_uuid);
    }
}

/// A value captured during a run, implicitly by a router or explicitly by a
/// result-saving action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_localized: Option<String>,
    pub node_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Json>,
    pub created_on: DateTime<Utc>,
}

/// Results keyed by the snakified result name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Results(HashMap<String, RunResult>);

impl Results {
    pub fn new() -> Self {
        Results(HashMap::new())
    }

    /// Saves a result under `snakify(result.name)`, replacing any previous
    /// result with the same key.
    pub fn save(&mut self, result: RunResult) {
        self.0.insert(snakify(&result.name), result);
    }

    pub fn get(&self, key: &str) -> Option<&RunResult> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RunResult)> {
        self.0.iter()
    }
}

/// The input that resumed the current wait, exposed to expressions as
/// `@input`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub type_name: String,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// One execution of one flow within a session.
#[derive(Debug, Clone)]
pub struct Run {
    pub uuid: Uuid,
    pub flow: Arc<Flow>,
    pub parent_uuid: Option<Uuid>,
    pub path: Vec<Step>,
    pub results: Results,
    pub status: RunStatus,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub exited_on: Option<DateTime<Utc>>,
    pub expires_on: Option<DateTime<Utc>>,
    /// The language translations are fetched in; seeded from the contact and
    /// falling back to the flow base language.
    pub language: Option<String>,
    pub input: Option<Input>,
    /// The last webhook call made by this run, exposed as `@webhook`.
    pub webhook: Option<Json>,
    /// Opaque extra carried by the trigger, exposed as `@legacy_extra`.
    pub extra: Option<Json>,
}

impl Run {
    pub fn new(
        uuid: Uuid,
        flow: Arc<Flow>,
        parent_uuid: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_on = flow.expire_after_minutes.map(|mins| {
            now + chrono::Duration::minutes(mins as i64)
        });
        Run {
            uuid,
            flow,
            parent_uuid,
            path: Vec::new(),
            results: Results::new(),
            status: RunStatus::Active,
            created_on: now,
            modified_on: now,
            exited_on: None,
            expires_on,
            language: None,
            input: None,
            webhook: None,
            extra: None,
        }
    }

    pub fn create_step(&mut self, uuid: Uuid, node_uuid: Uuid, now: DateTime<Utc>) -> Uuid {
        self.path.push(Step::new(uuid, node_uuid, now));
        self.modified_on = now;
        uuid
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.path.last()
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.path.last_mut()
    }

    /// Marks this run exited with the given terminal status.
    pub fn exit(&mut self, status: RunStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.exited_on = Some(now);
        self.modified_on = now;
    }
}

/// Snapshot form of a run for session serialization; the flow is stored as
/// a reference and re-resolved from assets on hydration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEnvelope {
    pub uuid: Uuid,
    pub flow_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<Uuid>,
    #[serde(default)]
    pub path: Vec<Step>,
    #[serde(default)]
    pub results: Results,
    pub status: RunStatus,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Input>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Json>,
}

impl Run {
    pub fn to_envelope(&self) -> RunEnvelope {
        RunEnvelope {
            uuid: self.uuid,
            flow_uuid: self.flow.uuid,
            parent_uuid: self.parent_uuid,
            path: self.path.clone(),
            results: self.results.clone(),
            status: self.status,
            created_on: self.created_on,
            modified_on: self.modified_on,
            exited_on: self.exited_on,
            expires_on: self.expires_on,
            language: self.language.clone(),
            input: self.input.clone(),
            webhook: self.webhook.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn from_envelope(envelope: RunEnvelope, flow: Arc<Flow>) -> Self {
        Run {
            uuid: envelope.uuid,
            flow,
            parent_uuid: envelope.parent_uuid,
            path: envelope.path,
            results: envelope.results,
            status: envelope.status,
            created_on: envelope.created_on,
            modified_on: envelope.modified_on,
            exited_on: envelope.exited_on,
            expires_on: envelope.expires_on,
            language: envelope.language,
            input: envelope.input,
            webhook: envelope.webhook,
            extra: envelope.extra,
        }
    }
}

// ================================
// Expression-facing views
// ================================

impl RunResult {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::text(self.name.clone()));
        map.insert("value".to_string(), Value::text(self.value.clone()));
        map.insert(
            "category".to_string(),
            Value::text(self.category.clone().unwrap_or_default()),
        );
        map.insert(
            "category_localized".to_string(),
            Value::text(
                self.category_localized
                    .clone()
                    .or_else(|| self.category.clone())
                    .unwrap_or_default(),
            ),
        );
        map.insert(
            "input".to_string(),
            Value::text(self.input.clone().unwrap_or_default()),
        );
        map.insert("node_uuid".to_string(), Value::text(self.node_uuid.to_string()));
        map.insert("created_on".to_string(), Value::DateTime(self.created_on));
        map.insert(
            "extra".to_string(),
            self.extra
                .as_ref()
                .map(Value::from_json)
                .unwrap_or(Value::Nil),
        );
        map.insert("__default__".to_string(), Value::text(self.value.clone()));
        Value::Object(map)
    }
}

/// `@results`: each result by its snakified name.
pub struct ResultsView<'a> {
    pub results: &'a Results,
}

impl ContextObject for ResultsView<'_> {
    fn properties(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.results.get(&key.to_lowercase()).map(|r| r.to_value())
    }

    fn default_value(&self) -> Value {
        let map: HashMap<String, Value> = self
            .results
            .iter()
            .map(|(k, r)| (k.clone(), r.to_value()))
            .collect();
        Value::Object(map)
    }
}

/// `@run`: uuid, flow, results, path timestamps and status.
pub struct RunView<'a> {
    pub run: &'a Run,
}

impl ContextObject for RunView<'_> {
    fn properties(&self) -> Vec<&'static str> {
        vec!["uuid", "flow", "status", "results", "created_on", "exited_on"]
    }

    fn get(&self, key: &str) -> Option<Value> {
        let run = self.run;
        match key.to_lowercase().as_str() {
            "uuid" => Some(Value::text(run.uuid.to_string())),
            "flow" => {
                let mut map = HashMap::new();
                map.insert("uuid".to_string(), Value::text(run.flow.uuid.to_string()));
                map.insert("name".to_string(), Value::text(run.flow.name.clone()));
                map.insert("__default__".to_string(), Value::text(run.flow.name.clone()));
                Some(Value::Object(map))
            }
            "status" => Some(Value::text(
                serde_json::to_value(run.status)
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default(),
            )),
            "results" => Some(
                ResultsView {
                    results: &run.results,
                }
                .default_value(),
            ),
            "created_on" => Some(Value::DateTime(run.created_on)),
            "exited_on" => Some(match run.exited_on {
                Some(on) => Value::DateTime(on),
                None => Value::Nil,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_flow() -> Arc<Flow> {
        Arc::new(Flow::empty(Uuid::new_v4(), "Test Flow", "eng"))
    }

    #[test]
    fn test_results_save_snakifies_keys() {
        let mut results = Results::new();
        let node_uuid = Uuid::new_v4();
        results.save(RunResult {
            name: "Favorite Color".into(),
            value: "red".into(),
            category: Some("Red".into()),
            category_localized: None,
            node_uuid,
            input: None,
            extra: None,
            created_on: Utc::now(),
        });

        let result = results.get("favorite_color").unwrap();
        assert_eq!(result.name, "Favorite Color");
        assert_eq!(result.node_uuid, node_uuid);
        assert!(results.get("Favorite Color").is_none());
    }

    #[test]
    fn test_result_overwrite() {
        let mut results = Results::new();
        let node_uuid = Uuid::new_v4();
        for value in ["red", "blue"] {
            results.save(RunResult {
                name: "Colour".into(),
                value: value.into(),
                category: None,
                category_localized: None,
                node_uuid,
                input: None,
                extra: None,
                created_on: Utc::now(),
            });
        }
        assert_eq!(results.len(), 1);
        assert_eq!(results.get("colour").unwrap().value, "blue");
    }

    #[test]
    fn test_run_lifecycle() {
        let now = Utc::now();
        let mut run = Run::new(Uuid::new_v4(), empty_flow(), None, now);
        assert_eq!(run.status, RunStatus::Active);
        assert!(run.path.is_empty());

        let node_uuid = Uuid::new_v4();
        run.create_step(Uuid::new_v4(), node_uuid, now);
        assert_eq!(run.current_step().unwrap().node_uuid, node_uuid);

        run.exit(RunStatus::Completed, now);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.exited_on, Some(now));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let now = Utc::now();
        let flow = empty_flow();
        let mut run = Run::new(Uuid::new_v4(), flow.clone(), None, now);
        run.create_step(Uuid::new_v4(), Uuid::new_v4(), now);

        let envelope = run.to_envelope();
        let json = serde_json::to_value(&envelope).unwrap();
        let back: RunEnvelope = serde_json::from_value(json).unwrap();
        let rebuilt = Run::from_envelope(back, flow);

        assert_eq!(rebuilt.uuid, run.uuid);
        assert_eq!(rebuilt.path.len(), 1);
        assert_eq!(rebuilt.status, RunStatus::Active);
    }

    #[test]
    fn test_results_context_view() {
        let mut results = Results::new();
        results.save(RunResult {
            name: "Colour".into(),
            value: "RED".into(),
            category: Some("Red".into()),
            category_localized: None,
            node_uuid: Uuid::new_v4(),
            input: Some("I love RED!".into()),
            extra: None,
            created_on: Utc::now(),
        });

        let view = ResultsView { results: &results };
        let colour = view.get("colour").unwrap();
        assert_eq!(colour.property("value"), Some(Value::text("RED")));
        assert_eq!(colour.property("category"), Some(Value::text("Red")));
        // category_localized falls back to category
        assert_eq!(
            colour.property("category_localized"),
            Some(Value::text("Red"))
        );
        // rendering the result directly gives its value
        assert_eq!(colour.to_repr(), "RED");
    }
}

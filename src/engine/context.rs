//! The per-action execution context: everything an action needs to evaluate
//! templates, mutate the run, and emit events.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::assets::SessionAssets;
use crate::contacts::ContactView;
use crate::context::{Context, ContextObject};
use crate::envs::Environment;
use crate::events::EventPayload;
use crate::modifiers::Modifier;
use crate::runs::{Input, ResultsView, Run, RunResult, RunView};
use crate::template::evaluate_template;
use crate::triggers::TriggerView;
use crate::values::Value;

use super::session::{new_event, Session};
use super::Engine;

/// Builds the expression root context for one run.
pub fn build_run_context(session: &Session, run_idx: usize) -> Context {
    let run = &session.runs[run_idx];
    let mut ctx = Context::new();

    ctx.put_object(
        "contact",
        &ContactView {
            contact: &session.contact,
        },
    );
    ctx.put(
        "fields",
        Value::Object(
            session
                .contact
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::text(v.text.clone())))
                .collect(),
        ),
    );
    ctx.put("urns", urns_value(session));
    ctx.put_object("results", &ResultsView { results: &run.results });
    ctx.put_object("run", &RunView { run });
    ctx.put_object(
        "trigger",
        &TriggerView {
            trigger: &session.trigger,
        },
    );
    ctx.put(
        "globals",
        Value::Object(
            session
                .assets
                .globals()
                .map(|g| (g.key.clone(), Value::text(g.value.clone())))
                .collect(),
        ),
    );
    ctx.put(
        "webhook",
        run.webhook
            .as_ref()
            .map(Value::from_json)
            .unwrap_or(Value::Nil),
    );
    ctx.put("input", input_value(run.input.as_ref()));
    ctx.put(
        "legacy_extra",
        run.extra.as_ref().map(Value::from_json).unwrap_or(Value::Nil),
    );

    if let Some(parent) = run.parent_uuid.and_then(|_| session.parent_run_of(run.uuid)) {
        ctx.put("parent", related_run_value(parent));
    } else {
        ctx.put("parent", Value::Nil);
    }
    if let Some(child) = session.child_run_of(run.uuid) {
        ctx.put("child", related_run_value(child));
    } else {
        ctx.put("child", Value::Nil);
    }

    ctx
}

fn urns_value(session: &Session) -> Value {
    let mut by_scheme: HashMap<String, Value> = HashMap::new();
    for urn in &session.contact.urns {
        by_scheme
            .entry(urn.scheme.clone())
            .or_insert_with(|| Value::text(urn.to_string()));
    }
    Value::Object(by_scheme)
}

fn input_value(input: Option<&Input>) -> Value {
    let Some(input) = input else {
        return Value::Nil;
    };
    let mut map = HashMap::new();
    map.insert("uuid".to_string(), Value::text(input.uuid.to_string()));
    map.insert("type".to_string(), Value::text(input.type_name.clone()));
    map.insert("text".to_string(), Value::text(input.text.clone()));
    map.insert(
        "urn".to_string(),
        input
            .urn
            .as_ref()
            .map(|u| Value::text(u.clone()))
            .unwrap_or(Value::Nil),
    );
    map.insert(
        "attachments".to_string(),
        Value::Array(
            input
                .attachments
                .iter()
                .map(|a| Value::text(a.clone()))
                .collect(),
        ),
    );
    map.insert("created_on".to_string(), Value::DateTime(input.created_on));

    let mut default_parts = vec![input.text.clone()];
    default_parts.extend(input.attachments.iter().cloned());
    map.insert(
        "__default__".to_string(),
        Value::text(
            default_parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    );
    Value::Object(map)
}

// parent/child runs expose a reduced view: flow, results, status
fn related_run_value(run: &Run) -> Value {
    let mut map = HashMap::new();
    map.insert("uuid".to_string(), Value::text(run.uuid.to_string()));
    let mut flow = HashMap::new();
    flow.insert("uuid".to_string(), Value::text(run.flow.uuid.to_string()));
    flow.insert("name".to_string(), Value::text(run.flow.name.clone()));
    flow.insert("__default__".to_string(), Value::text(run.flow.name.clone()));
    map.insert("flow".to_string(), Value::Object(flow));
    map.insert(
        "results".to_string(),
        ResultsView {
            results: &run.results,
        }
        .default_value(),
    );
    map.insert(
        "status".to_string(),
        Value::text(
            serde_json::to_value(run.status)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .unwrap_or_default(),
        ),
    );
    Value::Object(map)
}

/// Mutable execution context handed to actions.
pub struct RunContext<'a> {
    pub engine: &'a Engine,
    pub session: &'a mut Session,
    pub run_idx: usize,
}

impl RunContext<'_> {
    pub fn now(&self) -> DateTime<Utc> {
        self.engine.now()
    }

    pub fn new_uuid(&self) -> Uuid {
        self.engine.new_uuid()
    }

    pub fn run(&self) -> &Run {
        &self.session.runs[self.run_idx]
    }

    pub fn run_mut(&mut self) -> &mut Run {
        &mut self.session.runs[self.run_idx]
    }

    pub fn assets(&self) -> Arc<SessionAssets> {
        self.session.assets.clone()
    }

    pub fn environment(&self) -> &Environment {
        &self.session.environment
    }

    /// Translation languages in preference order for the current run.
    pub fn languages(&self) -> Vec<String> {
        let run = self.run();
        match &run.language {
            Some(lang) if *lang != run.flow.language => vec![lang.clone()],
            _ => Vec::new(),
        }
    }

    /// Localized strings for an item property, falling back to the given
    /// definition values.
    pub fn localized_texts(
        &self,
        item_uuid: Uuid,
        property: &str,
        defaults: &[String],
    ) -> Vec<String> {
        let run = self.run();
        run.flow
            .localization
            .get_texts(&self.languages(), item_uuid, property)
            .unwrap_or_else(|| defaults.to_vec())
    }

    /// Evaluates a template, logging every evaluation error as an `error`
    /// event attached to the step.
    pub fn eval_template(&mut self, step_uuid: Uuid, template: &str) -> String {
        let context = build_run_context(self.session, self.run_idx);
        let (text, errors) = evaluate_template(template, &context);
        for error in errors {
            self.log_error(step_uuid, error.message().to_string());
        }
        text
    }

    pub fn emit(&mut self, step_uuid: Option<Uuid>, payload: EventPayload) {
        let event = new_event(self.now(), step_uuid, payload);
        self.session.push_event(event);
    }

    /// Emits a recoverable `error` event; execution continues.
    pub fn log_error(&mut self, step_uuid: Uuid, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(%text, "recoverable error");
        self.emit(Some(step_uuid), EventPayload::Error { text });
    }

    /// Applies a contact modifier, emitting its change events through the
    /// step.
    pub fn apply_modifier(&mut self, step_uuid: Uuid, modifier: &Modifier) -> bool {
        let assets = self.session.assets.clone();
        let mut emitted = Vec::new();
        let changed = modifier.apply(
            &self.session.environment,
            &assets,
            &mut self.session.contact,
            &mut |payload| emitted.push(payload),
        );
        for payload in emitted {
            self.emit(Some(step_uuid), payload);
        }
        changed
    }

    /// Saves a result on the run and emits `run_result_changed`.
    pub fn save_result(&mut self, step_uuid: Uuid, result: RunResult) {
        self.emit(
            Some(step_uuid),
            EventPayload::RunResultChanged {
                name: result.name.clone(),
                value: result.value.clone(),
                category: result.category.clone(),
                category_localized: result.category_localized.clone(),
                input: result.input.clone(),
                extra: result.extra.clone(),
            },
        );
        self.run_mut().results.save(result);
    }
}

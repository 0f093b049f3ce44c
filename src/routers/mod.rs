//! Routers: the branching component of a node.

pub mod cases;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::context::Context;
use crate::definition::Localization;
use crate::envs::Environment;
use crate::error::ReadError;
use crate::template::evaluate_expression;
use crate::values::Value;
use crate::waits::{read_wait, Wait};

use cases::evaluate_case_test;

/// A labeled bucket an input can route into; maps to exactly one exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_uuid: Option<Uuid>,
}

/// One ordered test of a switch router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub test: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub category_uuid: Uuid,
}

/// The routing decision a router makes.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub exit_uuid: Option<Uuid>,
    pub category_name: String,
    pub category_localized: String,
    /// The matched value, saved as the result value.
    pub value: String,
    /// The evaluated operand, saved as the result input.
    pub input: String,
    pub extra: Option<Json>,
}

#[derive(Debug, Clone)]
pub enum RouterKind {
    /// Uniform pick over categories.
    Random,
    /// Ordered case tests against an evaluated operand.
    Switch {
        operand: String,
        cases: Vec<Case>,
        default_category_uuid: Option<Uuid>,
    },
}

#[derive(Debug, Clone)]
pub struct Router {
    pub kind: RouterKind,
    pub categories: Vec<Category>,
    /// When non-empty, routing saves a result under this name.
    pub result_name: Option<String>,
    pub wait: Option<Wait>,
}

/// Everything a router needs to make its decision.
pub struct RouteContext<'a> {
    pub context: &'a Context,
    pub localization: &'a Localization,
    /// Preference-ordered languages: run language first, flow base last.
    pub languages: Vec<String>,
    pub env: &'a Environment,
    pub rng: &'a mut StdRng,
}

impl Router {
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            RouterKind::Random => "random",
            RouterKind::Switch { .. } => "switch",
        }
    }

    /// Picks the route for the current step. Unusable case tests are
    /// reported as errors in the second tuple element; routing falls through
    /// to the default category.
    pub fn pick_route(&self, ctx: &mut RouteContext<'_>) -> (Route, Vec<String>) {
        match &self.kind {
            RouterKind::Random => {
                let mut errors = Vec::new();
                if self.categories.is_empty() {
                    errors.push("random router has no categories".to_string());
                    return (
                        self.route_to(None, String::new(), String::new(), None, ctx),
                        errors,
                    );
                }
                let index = ctx.rng.gen_range(0..self.categories.len());
                let category = &self.categories[index];
                (
                    self.route_to(
                        Some(category.uuid),
                        index.to_string(),
                        String::new(),
                        None,
                        ctx,
                    ),
                    errors,
                )
            }
            RouterKind::Switch {
                operand,
                cases,
                default_category_uuid,
            } => self.pick_switch_route(operand, cases, *default_category_uuid, ctx),
        }
    }

    fn pick_switch_route(
        &self,
        operand: &str,
        cases: &[Case],
        default_category_uuid: Option<Uuid>,
        ctx: &mut RouteContext<'_>,
    ) -> (Route, Vec<String>) {
        let mut errors = Vec::new();

        let expr = operand.trim();
        let expr = expr.strip_prefix('@').unwrap_or(expr);
        let expr = expr
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(expr);

        let operand_value = match evaluate_expression(expr, ctx.context) {
            Value::Error(e) => {
                errors.push(e.message().to_string());
                Value::Nil
            }
            v => v,
        };
        let operand_text = operand_value.to_repr();

        for case in cases {
            // case arguments are localizable
            let arguments = ctx
                .localization
                .get_texts(&ctx.languages, case.uuid, "arguments")
                .unwrap_or_else(|| case.arguments.clone());

            match evaluate_case_test(&case.test, &operand_value, &arguments, ctx.env) {
                Ok(Some(result)) => {
                    let route = self.route_to(
                        Some(case.category_uuid),
                        result.matched.to_repr(),
                        operand_text.clone(),
                        result.extra,
                        ctx,
                    );
                    return (route, errors);
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        (
            self.route_to(
                default_category_uuid,
                operand_text.clone(),
                operand_text,
                None,
                ctx,
            ),
            errors,
        )
    }

    fn route_to(
        &self,
        category_uuid: Option<Uuid>,
        value: String,
        input: String,
        extra: Option<Json>,
        ctx: &RouteContext<'_>,
    ) -> Route {
        let category = category_uuid.and_then(|uuid| self.categories.iter().find(|c| c.uuid == uuid));
        match category {
            Some(c) => {
                let localized = ctx
                    .localization
                    .get_texts(&ctx.languages, c.uuid, "name")
                    .and_then(|texts| texts.into_iter().next())
                    .unwrap_or_else(|| c.name.clone());
                Route {
                    exit_uuid: c.exit_uuid,
                    category_name: c.name.clone(),
                    category_localized: localized,
                    value,
                    input,
                    extra,
                }
            }
            None => Route {
                exit_uuid: None,
                category_name: String::new(),
                category_localized: String::new(),
                value,
                input,
                extra,
            },
        }
    }

    /// Checks that every category exit is one of the node's exits.
    pub fn validate(&self, exit_uuids: &[Uuid]) -> Result<(), String> {
        for category in &self.categories {
            if let Some(exit_uuid) = category.exit_uuid {
                if !exit_uuids.contains(&exit_uuid) {
                    return Err(format!(
                        "category '{}' references exit {} which is not an exit of the node",
                        category.name, exit_uuid
                    ));
                }
            }
        }
        if let RouterKind::Switch {
            cases,
            default_category_uuid,
            ..
        } = &self.kind
        {
            for case in cases {
                if !self.categories.iter().any(|c| c.uuid == case.category_uuid) {
                    return Err(format!(
                        "case {} references unknown category {}",
                        case.uuid, case.category_uuid
                    ));
                }
            }
            if let Some(default) = default_category_uuid {
                if !self.categories.iter().any(|c| c.uuid == *default) {
                    return Err(format!("default category {} is unknown", default));
                }
            }
        }
        Ok(())
    }
}

// wire envelope for routers
#[derive(Debug, Deserialize)]
struct RouterEnvelope {
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    operand: Option<String>,
    #[serde(default)]
    cases: Vec<Case>,
    #[serde(default)]
    default_category_uuid: Option<Uuid>,
    #[serde(default)]
    result_name: Option<String>,
    #[serde(default)]
    wait: Option<Json>,
}

/// Reads a router from its wire form.
pub fn read_router(data: &Json) -> Result<Router, ReadError> {
    let type_name = match data.get("type") {
        Some(Json::String(s)) => s.clone(),
        Some(_) | None => return Err(ReadError::MissingType),
    };

    let envelope: RouterEnvelope = serde_json::from_value(data.clone())?;
    let mut wait = envelope.wait.as_ref().map(read_wait).transpose()?;

    let kind = match type_name.as_str() {
        "random" => RouterKind::Random,
        "switch" => RouterKind::Switch {
            operand: envelope
                .operand
                .ok_or_else(|| ReadError::invalid("router", "switch router requires an operand"))?,
            cases: envelope.cases,
            default_category_uuid: envelope.default_category_uuid,
        },
        // a response router is switch semantics applied to the next inbound
        // message, so it always waits
        "response" => {
            if wait.is_none() {
                wait = Some(Wait::Msg {
                    timeout_seconds: None,
                    hint: None,
                });
            }
            RouterKind::Switch {
                operand: envelope
                    .operand
                    .unwrap_or_else(|| "@input.text".to_string()),
                cases: envelope.cases,
                default_category_uuid: envelope.default_category_uuid,
            }
        }
        other => return Err(ReadError::UnknownType(other.to_string())),
    };

    Ok(Router {
        kind,
        categories: envelope.categories,
        result_name: envelope.result_name.filter(|n| !n.is_empty()),
        wait,
    })
}

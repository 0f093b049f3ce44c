//! Actions that call out through the injected service seams. Service
//! failures never abort the run: they log an `error` event and continue.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{AssetKind, Dependency, Reference};
use crate::contacts::SCHEME_TEL;
use crate::engine::RunContext;
use crate::error::ActionError;
use crate::events::EventPayload;
use crate::runs::RunResult;
use crate::services::webhook::WebhookRequest;
use crate::services::CallStatus;

use super::Action;

/// Calls an external HTTP endpoint and exposes the call as `@webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallWebhookAction {
    pub uuid: Uuid,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resthook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_name: Option<String>,
}

#[async_trait]
impl Action for CallWebhookAction {
    fn type_name(&self) -> &'static str {
        "call_webhook"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let Some(service) = ctx.engine.webhook_service() else {
            ctx.log_error(step_uuid, "webhook service is not available");
            return Ok(());
        };

        let url = ctx.eval_template(step_uuid, &self.url);
        if url.is_empty() {
            ctx.log_error(step_uuid, "webhook URL evaluated to empty");
            return Ok(());
        }
        let body = self.body.as_ref().map(|b| ctx.eval_template(step_uuid, b));
        let mut headers = Vec::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let value = ctx.eval_template(step_uuid, value);
            headers.push((name.clone(), value));
        }

        let request = WebhookRequest {
            method: self.method.to_uppercase(),
            url,
            headers,
            body,
            resthook: self.resthook.clone(),
        };

        let timeout = Duration::from_secs(ctx.engine.config().webhook_timeout_secs);
        let call = match tokio::time::timeout(timeout, service.call(request)).await {
            Ok(call) => call,
            Err(_) => {
                ctx.log_error(step_uuid, "webhook call timed out");
                return Ok(());
            }
        };

        // parsed JSON body, when there is one
        let parsed_body = call
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok());

        ctx.run_mut().webhook = Some(serde_json::json!({
            "status": call.status.as_str(),
            "status_code": call.status_code,
            "json": parsed_body,
        }));

        ctx.emit(
            Some(step_uuid),
            EventPayload::WebhookCalled {
                url: call.url.clone(),
                status: call.status.as_str().to_string(),
                status_code: call.status_code,
                elapsed_ms: call.time_taken_ms,
                resthook: call.resthook.clone(),
                request: call.request.clone(),
                response: call.response.clone(),
            },
        );

        if let Some(name) = &self.result_name {
            let category = match call.status {
                CallStatus::Success => "Success",
                _ => "Failed",
            };
            let node_uuid = ctx
                .run()
                .current_step()
                .map(|s| s.node_uuid)
                .unwrap_or(self.uuid);
            let result = RunResult {
                name: name.clone(),
                value: call.status_code.to_string(),
                category: Some(category.to_string()),
                category_localized: None,
                node_uuid,
                input: Some(format!("{} {}", call.method, call.url)),
                extra: parsed_body,
                created_on: ctx.now(),
            };
            ctx.save_result(step_uuid, result);
        }
        Ok(())
    }
}

/// Classifies an input with an NLU classifier and saves the intents as a
/// result for `has_intent` routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallClassifierAction {
    pub uuid: Uuid,
    pub classifier: Reference,
    pub input: String,
    pub result_name: String,
}

#[async_trait]
impl Action for CallClassifierAction {
    fn type_name(&self) -> &'static str {
        "call_classifier"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(
            AssetKind::Classifier,
            self.classifier.clone(),
        )]
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let classifier = self
            .classifier
            .uuid
            .and_then(|uuid| ctx.assets().classifier(uuid).cloned());
        let Some(classifier) = classifier else {
            let dep = Dependency::new(AssetKind::Classifier, self.classifier.clone());
            ctx.log_error(step_uuid, format!("missing dependency: {}", dep));
            return Ok(());
        };

        let Some(service) = ctx.engine.classifier_service() else {
            ctx.log_error(step_uuid, "classifier service is not available");
            return Ok(());
        };

        let input = ctx.eval_template(step_uuid, &self.input);
        let timeout = Duration::from_secs(ctx.engine.config().classifier_timeout_secs);
        let classification = match tokio::time::timeout(timeout, service.classify(&input)).await {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                ctx.log_error(step_uuid, format!("classifier call failed: {}", e));
                return Ok(());
            }
            Err(_) => {
                ctx.log_error(step_uuid, "classifier call timed out");
                return Ok(());
            }
        };

        ctx.emit(
            Some(step_uuid),
            EventPayload::ClassifierCalled {
                classifier: Reference::by_uuid(classifier.uuid, classifier.name.clone()),
                input: input.clone(),
                intents: classification.intents.clone(),
            },
        );

        let top_intent = classification.intents.first().cloned();
        let node_uuid = ctx
            .run()
            .current_step()
            .map(|s| s.node_uuid)
            .unwrap_or(self.uuid);
        let result = RunResult {
            name: self.result_name.clone(),
            value: top_intent.as_ref().map(|i| i.name.clone()).unwrap_or_default(),
            category: top_intent.map(|i| i.name),
            category_localized: None,
            node_uuid,
            input: Some(input),
            extra: serde_json::to_value(&classification).ok(),
            created_on: ctx.now(),
        };
        ctx.save_result(step_uuid, result);
        Ok(())
    }
}

/// Transfers airtime credit to the contact's phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAirtimeAction {
    pub uuid: Uuid,
    /// Desired amount by currency code.
    pub amounts: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_name: Option<String>,
}

#[async_trait]
impl Action for TransferAirtimeAction {
    fn type_name(&self) -> &'static str {
        "transfer_airtime"
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn execute(&self, ctx: &mut RunContext<'_>, step_uuid: Uuid) -> Result<(), ActionError> {
        let Some(service) = ctx.engine.airtime_service() else {
            ctx.log_error(step_uuid, "airtime service is not available");
            return Ok(());
        };

        let recipient = ctx
            .session
            .contact
            .urns
            .iter()
            .find(|u| u.scheme == SCHEME_TEL)
            .map(|u| u.identity());
        let Some(recipient) = recipient else {
            ctx.log_error(step_uuid, "contact has no tel URN");
            return Ok(());
        };

        let transfer = match service.transfer("", &recipient, &self.amounts).await {
            Ok(t) => t,
            Err(e) => {
                ctx.log_error(step_uuid, format!("airtime transfer failed: {}", e));
                if let Some(name) = &self.result_name {
                    self.save_status_result(ctx, step_uuid, name.clone(), "Failed");
                }
                return Ok(());
            }
        };

        ctx.emit(
            Some(step_uuid),
            EventPayload::AirtimeTransferred {
                sender: transfer.sender.clone(),
                recipient: transfer.recipient.clone(),
                currency: transfer.currency.clone(),
                desired_amount: transfer.desired_amount,
                actual_amount: transfer.actual_amount,
            },
        );

        if let Some(name) = &self.result_name {
            self.save_status_result(ctx, step_uuid, name.clone(), "Success");
        }
        Ok(())
    }
}

impl TransferAirtimeAction {
    fn save_status_result(
        &self,
        ctx: &mut RunContext<'_>,
        step_uuid: Uuid,
        name: String,
        category: &str,
    ) {
        let node_uuid = ctx
            .run()
            .current_step()
            .map(|s| s.node_uuid)
            .unwrap_or(self.uuid);
        let result = RunResult {
            name,
            value: category.to_lowercase(),
            category: Some(category.to_string()),
            category_localized: None,
            node_uuid,
            input: None,
            extra: None,
            created_on: ctx.now(),
        };
        ctx.save_result(step_uuid, result);
    }
}

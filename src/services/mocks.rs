//! Canned service implementations for tests and offline runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::airtime::{AirtimeService, AirtimeTransfer};
use super::classifier::{Classification, ClassifierService};
use super::webhook::{call_from_response, dump_request, WebhookCall, WebhookRequest, WebhookService};

/// One canned HTTP response.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn json(body: &str) -> Self {
        CannedResponse {
            status_code: 200,
            content_type: Some("application/json".into()),
            body: body.as_bytes().to_vec(),
        }
    }
}

/// A webhook service that answers from a queue of canned responses, applying
/// the same body-capture policy as the real service.
pub struct MockWebhookService {
    responses: Mutex<VecDeque<CannedResponse>>,
    max_body_bytes: usize,
}

impl MockWebhookService {
    pub fn new(max_body_bytes: usize) -> Self {
        MockWebhookService {
            responses: Mutex::new(VecDeque::new()),
            max_body_bytes,
        }
    }

    pub fn enqueue(&self, response: CannedResponse) {
        self.responses.lock().push_back(response);
    }
}

#[async_trait]
impl WebhookService for MockWebhookService {
    async fn call(&self, request: WebhookRequest) -> WebhookCall {
        let trace = dump_request(&request);
        let canned = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| CannedResponse::json("{}"));
        let limit = self.max_body_bytes + 1;
        let body = &canned.body[..canned.body.len().min(limit)];
        call_from_response(
            &request,
            trace,
            canned.status_code,
            canned.content_type.as_deref(),
            body,
            self.max_body_bytes,
            0,
        )
    }
}

/// A classifier that always returns the same intents.
pub struct MockClassifierService {
    pub classification: Classification,
}

#[async_trait]
impl ClassifierService for MockClassifierService {
    async fn classify(&self, _input: &str) -> Result<Classification, String> {
        Ok(self.classification.clone())
    }
}

/// An airtime service that transfers exactly what was asked, in the first
/// currency offered.
pub struct MockAirtimeService;

#[async_trait]
impl AirtimeService for MockAirtimeService {
    async fn transfer(
        &self,
        sender: &str,
        recipient: &str,
        amounts: &HashMap<String, f64>,
    ) -> Result<AirtimeTransfer, String> {
        let mut currencies: Vec<&String> = amounts.keys().collect();
        currencies.sort();
        let currency = currencies
            .first()
            .ok_or_else(|| "no amounts provided".to_string())?;
        let amount = amounts[*currency];
        Ok(AirtimeTransfer {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            currency: (*currency).clone(),
            desired_amount: amount,
            actual_amount: amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::webhook::CallStatus;

    #[tokio::test]
    async fn test_mock_webhook_applies_body_cap() {
        let service = MockWebhookService::new(1024);
        service.enqueue(CannedResponse {
            status_code: 200,
            content_type: Some("text/plain".into()),
            body: vec![b'Y'; 2000],
        });

        let call = service
            .call(WebhookRequest {
                method: "GET".into(),
                url: "http://temba.io/big".into(),
                headers: vec![],
                body: None,
                resthook: String::new(),
            })
            .await;

        assert_eq!(call.status, CallStatus::ResponseError);
        assert!(call.response.contains("trimmed"));
    }

    #[tokio::test]
    async fn test_mock_airtime() {
        let mut amounts = HashMap::new();
        amounts.insert("USD".to_string(), 1.5);
        let transfer = MockAirtimeService
            .transfer("tel:+1000", "tel:+2000", &amounts)
            .await
            .unwrap();
        assert_eq!(transfer.currency, "USD");
        assert_eq!(transfer.actual_amount, 1.5);
    }
}

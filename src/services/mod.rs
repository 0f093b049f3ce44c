//! Service seams the engine calls out through: webhooks, classifiers and
//! airtime transfers. Services are injected per engine; a service failure is
//! a non-fatal action outcome.

pub mod airtime;
pub mod classifier;
pub mod mocks;
pub mod webhook;

pub use airtime::{AirtimeService, AirtimeTransfer};
pub use classifier::{Classification, ClassifierService};
pub use webhook::{CallStatus, WebhookCall, WebhookRequest, WebhookService};

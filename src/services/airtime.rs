//! The airtime transfer service seam.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A completed (or attempted) airtime transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtimeTransfer {
    pub sender: String,
    pub recipient: String,
    pub currency: String,
    pub desired_amount: f64,
    pub actual_amount: f64,
}

#[async_trait]
pub trait AirtimeService: Send + Sync {
    /// Attempts a transfer to the recipient, picking a currency from the
    /// desired amounts.
    async fn transfer(
        &self,
        sender: &str,
        recipient: &str,
        amounts: &HashMap<String, f64>,
    ) -> Result<AirtimeTransfer, String>;
}

//! The NLU classifier service seam.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::events::Intent;

/// An entity extracted by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub value: String,
    pub confidence: f64,
}

/// The result of classifying one input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub intents: Vec<Intent>,
    #[serde(default)]
    pub entities: HashMap<String, Vec<ExtractedEntity>>,
}

#[async_trait]
pub trait ClassifierService: Send + Sync {
    async fn classify(&self, input: &str) -> Result<Classification, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_serde() {
        let classification = Classification {
            intents: vec![Intent {
                name: "book_flight".into(),
                confidence: 0.5,
            }],
            entities: HashMap::new(),
        };
        let json = serde_json::to_value(&classification).unwrap();
        assert_eq!(json["intents"][0]["name"], "book_flight");

        let back: Classification = serde_json::from_value(json).unwrap();
        assert_eq!(back.intents.len(), 1);
    }
}

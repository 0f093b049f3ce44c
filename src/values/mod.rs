//! The tagged value model shared by templates, routers and run results.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

/// An error produced while resolving or coercing a value. Evaluation is total:
/// errors travel as values and the first one encountered wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        EvalError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A value in the flow runtime.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Text(String),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    Error(EvalError),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(EvalError::new(message))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_error(&self) -> Option<&EvalError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Renders this value the way templates do. Nil renders empty, errors
    /// render their message, arrays join on comma.
    pub fn to_repr(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Array(items) => items
                .iter()
                .map(|v| v.to_repr())
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(map) => {
                // objects prefer their own display key when present
                for key in ["__default__", "name", "text"] {
                    if let Some(v) = map.get(key) {
                        return v.to_repr();
                    }
                }
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
            Value::Error(e) => e.message().to_string(),
        }
    }

    /// Coerces to a number, parsing text if needed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Truthiness: nil, errors, empty text, zero, false and empty collections
    /// are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil | Value::Error(_) => false,
            Value::Text(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0,
            Value::Boolean(b) => *b,
            Value::DateTime(_) => true,
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    /// Convert to a JSON value. Errors serialize to null, datetimes to RFC 3339.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Nil | Value::Error(_) => Json::Null,
            Value::Text(s) => Json::String(s.clone()),
            Value::Number(n) => serde_json::json!(*n),
            Value::Boolean(b) => Json::Bool(*b),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Array(items) => Json::Array(items.iter().map(|v| v.to_json()).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Create a value from a JSON value.
    pub fn from_json(v: &Json) -> Self {
        match v {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Boolean(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::Text(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Case-insensitive property lookup on object values.
    pub fn property(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(map) => {
                if let Some(v) = map.get(name) {
                    return Some(v.clone());
                }
                let lowered = name.to_lowercase();
                map.iter()
                    .find(|(k, _)| k.to_lowercase() == lowered)
                    .map(|(_, v)| v.clone())
            }
            _ => None,
        }
    }
}

// integers render without a trailing ".0"
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => (a - b).abs() < 1e-10,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => self.to_json() == other.to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_repr())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Json::deserialize(deserializer)?;
        Ok(Value::from_json(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_repr() {
        assert_eq!(Value::Nil.to_repr(), "");
        assert_eq!(Value::text("hi").to_repr(), "hi");
        assert_eq!(Value::Number(42.0).to_repr(), "42");
        assert_eq!(Value::Number(1.5).to_repr(), "1.5");
        assert_eq!(Value::Boolean(true).to_repr(), "true");
        assert_eq!(Value::error("boom").to_repr(), "boom");
        assert_eq!(
            Value::Array(vec![Value::text("a"), Value::text("b")]).to_repr(),
            "a, b"
        );

        let dt = Utc.with_ymd_and_hms(2018, 4, 11, 18, 24, 30).unwrap();
        assert_eq!(Value::DateTime(dt).to_repr(), "2018-04-11T18:24:30Z");
    }

    #[test]
    fn test_as_number() {
        assert_eq!(Value::Number(3.5).as_number(), Some(3.5));
        assert_eq!(Value::text(" 12 ").as_number(), Some(12.0));
        assert_eq!(Value::text("twelve").as_number(), None);
        assert_eq!(Value::Boolean(true).as_number(), Some(1.0));
        assert_eq!(Value::Nil.as_number(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::text("").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::error("x").is_truthy());
        assert!(Value::text("yes").is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
    }

    #[test]
    fn test_json_roundtrip() {
        let v = Value::from_json(&serde_json::json!({"a": [1, "two", null], "b": true}));
        let back = v.to_json();
        assert_eq!(back, serde_json::json!({"a": [1.0, "two", null], "b": true}));
    }

    #[test]
    fn test_property_case_insensitive() {
        let v = Value::from_json(&serde_json::json!({"Name": "Ryan"}));
        assert_eq!(v.property("name"), Some(Value::text("Ryan")));
        assert_eq!(v.property("NAME"), Some(Value::text("Ryan")));
        assert_eq!(v.property("missing"), None);
    }
}

//! The environment a session executes in: languages, timezone, formats.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    #[serde(rename = "DD-MM-YYYY")]
    DayMonthYear,
    #[serde(rename = "MM-DD-YYYY")]
    MonthDayYear,
    #[serde(rename = "YYYY-MM-DD")]
    YearMonthDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    #[serde(rename = "tt:mm")]
    HourMinute,
    #[serde(rename = "tt:mm:ss")]
    HourMinuteSecond,
}

/// How URNs are rendered in events and expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionPolicy {
    None,
    Urns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default = "default_date_format")]
    pub date_format: DateFormat,
    #[serde(default = "default_time_format")]
    pub time_format: TimeFormat,
    /// IANA zone name, e.g. `America/Bogota`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_languages: Vec<String>,
    #[serde(default = "default_redaction")]
    pub redaction_policy: RedactionPolicy,
    #[serde(default = "default_max_value_length")]
    pub max_value_length: usize,
}

fn default_date_format() -> DateFormat {
    DateFormat::YearMonthDay
}

fn default_time_format() -> TimeFormat {
    TimeFormat::HourMinute
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_redaction() -> RedactionPolicy {
    RedactionPolicy::None
}

fn default_max_value_length() -> usize {
    640
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            date_format: default_date_format(),
            time_format: default_time_format(),
            timezone: default_timezone(),
            default_language: None,
            allowed_languages: Vec::new(),
            redaction_policy: default_redaction(),
            max_value_length: default_max_value_length(),
        }
    }
}

impl Environment {
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = Some(language.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

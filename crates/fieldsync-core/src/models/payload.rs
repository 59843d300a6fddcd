//! Opaque report payload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Fields that make a good one-line label for a report, in priority order.
const SUMMARY_FIELDS: &[&str] = &["meterNumber", "customerName", "classification", "title"];

/// Domain fields of a report (location, classification, contact info, photo
/// references, capture time). The sync engine never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportPayload(Map<String, Value>);

impl ReportPayload {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a payload from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::InvalidInput(format!(
                "report payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Short human label: first well-known field, else first string field.
    pub fn summary(&self) -> String {
        SUMMARY_FIELDS
            .iter()
            .find_map(|field| {
                self.0
                    .get(*field)
                    .and_then(Value::as_str)
                    .map(|value| format!("{field}={value}"))
            })
            .or_else(|| {
                self.0.iter().find_map(|(field, value)| {
                    value.as_str().map(|value| format!("{field}={value}"))
                })
            })
            .unwrap_or_else(|| "(no summary)".to_string())
    }
}

impl From<Map<String, Value>> for ReportPayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

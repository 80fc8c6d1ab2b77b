//! Payload redaction for diagnostic output.
//!
//! Command payloads may carry account data, so they never reach a log sink
//! verbatim. [`redact`] keeps the shape of a JSON value and replaces every
//! leaf with the name of its type. Strings that parse as dates become
//! [`DATE_MARKER`]. Wire content is never touched.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

/// Replacement for date-like string leaves.
pub const DATE_MARKER: &str = "<date>";

/// Return a copy of `value` with every leaf replaced by its type name.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) if is_date_like(s) => Value::String(DATE_MARKER.to_string()),
        leaf => Value::String(type_name(leaf).to_string()),
    }
}

/// JSON type name of a value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_date_like(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

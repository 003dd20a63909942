//! Lenient value coercion for raw API records
//!
//! The source API is loosely typed: numbers arrive as strings, dates arrive
//! in several layouts and blanks arrive as empty strings. Every helper here
//! maps "cannot interpret" to `None`; the `require_*` variants turn that into
//! a [`CoerceError`] for fields that identify a record.

use crate::error::{CoerceError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

/// Canonical text layout for stored timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

static NULL: Value = Value::Null;

/// Look up a field, treating an absent key as JSON null
pub fn field<'a>(record: &'a Map<String, Value>, name: &str) -> &'a Value {
    record.get(name).unwrap_or(&NULL)
}

/// First non-null value among several candidate field names
pub fn first_present<'a>(record: &'a Map<String, Value>, names: &[&str]) -> &'a Value {
    names
        .iter()
        .map(|name| field(record, name))
        .find(|value| !value.is_null())
        .unwrap_or(&NULL)
}

/// Trim a value into a string; blank becomes `None`
///
/// Numbers and booleans are rendered as text. `max_length` truncates on
/// character boundaries.
pub fn clean_string(value: &Value, max_length: Option<usize>) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };

    if text.is_empty() {
        return None;
    }

    match max_length {
        Some(max) if text.chars().count() > max => Some(text.chars().take(max).collect()),
        _ => Some(text),
    }
}

/// Parse an integer, truncating fractional input
pub fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        },
        _ => None,
    }
}

fn truncate(f: f64) -> Option<i64> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

/// Parse a float; non-numeric input becomes `None`
pub fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Normalize common truthy/falsy spellings
pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
            "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a date or date-time in any of the layouts the source uses
///
/// RFC 3339 input keeps its wall-clock time; the offset is discarded rather
/// than converted so that operative dates never shift across midnight.
pub fn to_datetime(value: &Value) -> Option<NaiveDateTime> {
    let s = match value {
        Value::String(s) => s.trim(),
        _ => return None,
    };
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Render a timestamp in [`TIMESTAMP_FORMAT`]
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn require_int(record: &Map<String, Value>, name: &str) -> Result<i64> {
    let value = field(record, name);
    if value.is_null() {
        return Err(CoerceError::missing(name));
    }
    to_int(value).ok_or_else(|| CoerceError::invalid(name, "integer", value))
}

pub fn require_string(
    record: &Map<String, Value>,
    name: &str,
    max_length: Option<usize>,
) -> Result<String> {
    clean_string(field(record, name), max_length).ok_or_else(|| CoerceError::missing(name))
}

pub fn require_datetime(record: &Map<String, Value>, name: &str) -> Result<NaiveDateTime> {
    let value = field(record, name);
    if value.is_null() {
        return Err(CoerceError::missing(name));
    }
    to_datetime(value).ok_or_else(|| CoerceError::invalid(name, "date", value))
}

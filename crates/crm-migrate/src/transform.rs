//! Field value conversion from the source's JSON shapes to MySQL-ready values.
//!
//! The source client returns untyped JSON, so rules are chosen by the runtime
//! shape of each value rather than by any declared column type:
//!
//! | shape                               | becomes                          |
//! |-------------------------------------|----------------------------------|
//! | null                                | null                             |
//! | array / object                      | JSON-encoded string              |
//! | boolean                             | `1` / `0`                        |
//! | string starting `YYYY-MM-DDTHH:MM:SS` | `YYYY-MM-DD HH:MM:SS`          |
//! | anything else                       | unchanged                        |
//!
//! Every rule's output falls outside the shapes that trigger a conversion, so
//! transforming an already transformed value is a no-op.

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::trace;

use crate::core::Record;

/// Length of the `YYYY-MM-DDTHH:MM:SS` prefix.
const DATETIME_PREFIX_LEN: usize = 19;

/// Convert a single field value.
pub fn transform_value(value: &Value, field: &str) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(_) | Value::Object(_) => {
            trace!("{}: encoding structured value as JSON text", field);
            Value::String(value.to_string())
        }
        Value::Bool(b) => Value::from(u8::from(*b)),
        Value::String(s) => match normalize_timestamp(s) {
            Some(ts) => {
                trace!("{}: normalized timestamp {}", field, s);
                Value::String(ts)
            }
            None => value.clone(),
        },
        Value::Number(_) => value.clone(),
    }
}

/// Convert every field of a record, preserving field order.
pub fn transform_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(field, value)| {
            let converted = transform_value(&value, &field);
            (field, converted)
        })
        .collect()
}

/// Re-render an ISO-8601 date-time as `YYYY-MM-DD HH:MM:SS`.
///
/// Only the leading `YYYY-MM-DDTHH:MM:SS` is kept; fractional seconds and any
/// zone designator are dropped as-is, without shifting to UTC. Returns `None`
/// when the string does not start with a valid date-time.
pub fn normalize_timestamp(s: &str) -> Option<String> {
    let prefix = s.get(..DATETIME_PREFIX_LEN)?;
    if !has_datetime_shape(prefix.as_bytes()) {
        return None;
    }
    let parsed = NaiveDateTime::parse_from_str(prefix, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some(parsed.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Digits everywhere except the separators of `YYYY-MM-DDTHH:MM:SS`.
///
/// chrono tolerates padding spaces in numeric fields, so the exact layout is
/// checked before parsing.
fn has_datetime_shape(prefix: &[u8]) -> bool {
    prefix.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        10 => *b == b'T',
        13 | 16 => *b == b':',
        _ => b.is_ascii_digit(),
    })
}

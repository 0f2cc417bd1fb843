//! Lenient parsing of multi-typed wire fields.
//!
//! The storage-RPC and open-group wire formats return ids, ports and
//! timestamps as any of integer, long or string. Every wire parser in
//! the workspace goes through these helpers, which try each form in
//! turn and fail with [`HavenchatError::ParsingFailed`] on
//! none-of-the-above.

use havenchat_types::{HavenchatError, Result};
use serde_json::Value;

/// Extracts `obj[field]` as an `i64`, accepting integer or numeric
/// string forms.
pub fn field_i64(obj: &Value, field: &str) -> Result<i64> {
    let value = obj
        .get(field)
        .ok_or_else(|| missing(field))?;
    lenient_i64(value).ok_or_else(|| HavenchatError::ParsingFailed {
        reason: format!("field '{field}' is not an integer or numeric string: {value}"),
    })
}

/// Extracts `obj[field]` as a `u64`, accepting integer or numeric
/// string forms.
pub fn field_u64(obj: &Value, field: &str) -> Result<u64> {
    let n = field_i64(obj, field)?;
    u64::try_from(n).map_err(|_| HavenchatError::ParsingFailed {
        reason: format!("field '{field}' is negative: {n}"),
    })
}

/// Extracts `obj[field]` as a port number, accepting integer or
/// numeric string forms.
pub fn field_port(obj: &Value, field: &str) -> Result<u16> {
    let n = field_i64(obj, field)?;
    u16::try_from(n).map_err(|_| HavenchatError::ParsingFailed {
        reason: format!("field '{field}' is not a valid port: {n}"),
    })
}

/// Extracts `obj[field]` as a string slice.
pub fn field_str<'a>(obj: &'a Value, field: &str) -> Result<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(field))
}

/// Interprets a single value as an `i64` if it is an integer, a float
/// with integral value, or a numeric string.
pub fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9e15)
                    .map(|f| f as i64)
            }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn missing(field: &str) -> HavenchatError {
    HavenchatError::ParsingFailed {
        reason: format!("missing required field '{field}'"),
    }
}

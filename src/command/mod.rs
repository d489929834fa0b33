//! Volume command parsing
//!
//! A command payload is either a bare decimal integer (`110`) or a JSON
//! object carrying a `volume` or `value` field (`{"volume": 110}`,
//! `{"value": "42.5"}`, `{"volume": true}`). Anything else is not a
//! command.
//!
//! Parsing never fails loudly: an unusable payload yields `None` so the
//! caller can log it and move on.

use serde_json::{Map, Value};


/// JSON fields that may carry the volume, in lookup order
const VOLUME_FIELDS: [&str; 2] = ["volume", "value"];

/// Parse a raw payload into a volume
pub fn parse_volume(payload: &[u8]) -> Option<i64> {
    let text = decode_lossy(payload);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        // All digits, so the only possible failure is overflow
        return Some(text.parse().unwrap_or(i64::MAX));
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => volume_field(&fields),
        _ => None,
    }
}

/// Decode UTF-8, dropping invalid byte sequences instead of replacing them
fn decode_lossy(payload: &[u8]) -> String {
    payload
        .utf8_chunks()
        .map(|chunk| chunk.valid())
        .collect()
}

/// Pick the first field holding a number, a string or a boolean and
/// convert it. Booleans count as 0 and 1.
///
/// A field of any other type is skipped, but a selected field that does
/// not convert ends the lookup.
fn volume_field(fields: &Map<String, Value>) -> Option<i64> {
    let selected = VOLUME_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name))
        .find(|value| value.is_number() || value.is_string() || value.is_boolean())?;

    let number = match selected {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => return Some(i64::from(*b)),
        _ => return None,
    };

    truncate(number)
}

/// Truncate toward zero; non-finite values are not volumes
fn truncate(number: f64) -> Option<i64> {
    if !number.is_finite() {
        return None;
    }
    // `as` saturates at the i64 bounds
    Some(number.trunc() as i64)
}

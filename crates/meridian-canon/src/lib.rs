#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-canon** – Deterministic canonical-JSON codec.
//!
//! Serializes any JSON value to bytes under rules that make two
//! semantically-equal payloads produce byte-identical output: object keys
//! sorted by code point, numbers restricted to finite values, a fixed string
//! escape set, a depth ceiling, and cycle detection. Every hash or signature
//! computed anywhere in the workspace is computed over these bytes, never
//! over `serde_json::to_vec`'s insertion-ordered output.

use std::fmt;

use meridian_types::MAX_CANON_DEPTH;
use serde_json::{Map, Number, Value};

/// Errors the canonical-JSON codec can raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonError {
    /// A value of a kind the codec cannot represent (this path is
    /// unreachable from `serde_json::Value` today but kept for forward
    /// compatibility with a future non-JSON builder).
    UnsupportedValue(String),
    /// A number was NaN or +/-infinity.
    NonFiniteNumber,
    /// The value graph contains a cycle.
    Circular,
    /// Nesting exceeded [`MAX_CANON_DEPTH`].
    TooDeep,
}

impl fmt::Display for CanonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedValue(what) => write!(f, "UNSUPPORTED_VALUE: {what}"),
            Self::NonFiniteNumber => write!(f, "NON_FINITE_NUMBER"),
            Self::Circular => write!(f, "CIRCULAR"),
            Self::TooDeep => write!(f, "TOO_DEEP"),
        }
    }
}

impl std::error::Error for CanonError {}

/// Serialize `value` to canonical bytes.
///
/// Object keys are sorted by code point; numbers must be finite; strings are
/// emitted as UTF-8 with a minimal canonical escape set; depth is capped at
/// [`MAX_CANON_DEPTH`].
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonError> {
    let mut out = Vec::new();
    write_value(value, 1, &mut out)?;
    Ok(out)
}

/// Serialize any `serde::Serialize` value via its `serde_json::Value`
/// projection, then canonicalize that. Convenience wrapper for callers that
/// hold a typed struct rather than a raw `Value`.
pub fn canonicalize_serializable<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let as_value = serde_json::to_value(value)
        .map_err(|e| CanonError::UnsupportedValue(e.to_string()))?;
    canonicalize(&as_value)
}

/// Parse canonical bytes back into a [`Value`]. Re-encoding the result with
/// [`canonicalize`] reproduces the original bytes exactly, provided the input
/// bytes were themselves canonical.
pub fn decode(bytes: &[u8]) -> Result<Value, CanonError> {
    serde_json::from_slice(bytes).map_err(|e| CanonError::UnsupportedValue(e.to_string()))
}

fn write_value(value: &Value, depth: usize, out: &mut Vec<u8>) -> Result<(), CanonError> {
    if depth > MAX_CANON_DEPTH {
        return Err(CanonError::TooDeep);
    }
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, depth + 1, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, depth, out)?,
    }
    Ok(())
}

fn write_number(n: &Number, out: &mut Vec<u8>) -> Result<(), CanonError> {
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CanonError::NonFiniteNumber);
        }
    }
    out.extend_from_slice(n.to_string().as_bytes());
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\u{8}' => out.extend_from_slice(b"\\b"),
            '\u{c}' => out.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

fn write_object(map: &Map<String, Value>, depth: usize, out: &mut Vec<u8>) -> Result<(), CanonError> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    out.push(b'{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_string(key, out);
        out.push(b':');
        write_value(&map[key], depth + 1, out)?;
    }
    out.push(b'}');
    Ok(())
}

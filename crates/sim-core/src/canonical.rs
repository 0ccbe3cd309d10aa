//! Canonical value encoding and hashing.
//!
//! Every hash-participating payload goes through this module: UTF-8, compact
//! separators, lexicographic object key order (`serde_json::Map` is
//! BTreeMap-backed), decimal integers, shortest-round-trip floats. The same
//! encoding is used for on-disk saves so a save written twice from the same
//! state is byte-identical.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::SimError;

/// Validates that a value is JSON-safe for authoritative state: null, bool,
/// integers within the 64-bit signed range, finite numbers, strings, arrays
/// of the same, and objects with string keys.
pub fn validate_json_value(value: &Value, field_name: &str) -> Result<(), SimError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
        Value::Number(number) => {
            if number.is_u64() && number.as_i64().is_none() {
                return Err(SimError::InvalidArgument(format!(
                    "{field_name} integers must fit the 64-bit signed range"
                )));
            }
            if let Some(float) = number.as_f64() {
                if !float.is_finite() {
                    return Err(SimError::InvalidArgument(format!(
                        "{field_name} numbers must be finite"
                    )));
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_json_value(item, field_name)?;
            }
            Ok(())
        }
        Value::Object(entries) => {
            for nested in entries.values() {
                validate_json_value(nested, field_name)?;
            }
            Ok(())
        }
    }
}

/// Canonical text form of a value. Object keys come out lexicographically
/// ordered; no whitespace is emitted.
pub fn canonical_encode(value: &Value) -> Result<String, SimError> {
    serde_json::to_string(value).map_err(SimError::from)
}

pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// `sha256(canonical_encode(value))` as lowercase hex.
pub fn canonical_hash(value: &Value) -> Result<String, SimError> {
    let encoded = canonical_encode(value)?;
    Ok(hex_digest(encoded.as_bytes()))
}

/// Deterministic 63-bit identifier derived from an arbitrary tag. Used for
/// forensic trace entries that do not originate from a queued event.
pub fn trace_id_from_tag(tag: &str) -> u64 {
    let digest = Sha256::digest(tag.as_bytes());
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(raw) & (i64::MAX as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_encode_orders_keys_and_strips_whitespace() {
        let value = json!({"zulu": 1, "alpha": [1, 2], "mike": {"b": true, "a": null}});
        let encoded = canonical_encode(&value).expect("encode");
        assert_eq!(encoded, r#"{"alpha":[1,2],"mike":{"a":null,"b":true},"zulu":1}"#);
    }

    #[test]
    fn canonical_hash_is_stable() {
        let value = json!({"hexes": []});
        let first = canonical_hash(&value).expect("hash");
        let second = canonical_hash(&value).expect("hash");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn validate_rejects_out_of_range_integers() {
        let value = json!({"big": u64::MAX});
        assert!(validate_json_value(&value, "params").is_err());
        let fine = json!({"big": i64::MAX});
        assert!(validate_json_value(&fine, "params").is_ok());
    }

    #[test]
    fn trace_id_fits_signed_range() {
        for tag in ["inventory:0:0:applied", "supply:12:abcd", ""] {
            assert!(trace_id_from_tag(tag) <= i64::MAX as u64);
        }
    }

    #[test]
    fn float_encoding_round_trips() {
        let value = json!({"x": 0.30000000000000004, "y": 1.5});
        let encoded = canonical_encode(&value).expect("encode");
        let decoded: Value = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(value, decoded);
    }
}

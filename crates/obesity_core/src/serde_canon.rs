//! Canonical JSON serialization for content addressing
//!
//! Transform states, boosters and artifacts are identified by the Blake3
//! hash of their canonical JSON form:
//! - object keys sorted recursively
//! - no whitespace
//! - serde_json's shortest round-trip float formatting

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// serde_json renders NaN and infinities as null, which would alias them
    #[error("Non-finite number at {0}")]
    NonFinite(String),
}

/// Serialize a value to canonical JSON (sorted keys, no whitespace)
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let json_value = serde_json::to_value(value)
        .map_err(|e| CanonicalError::SerializationError(e.to_string()))?;

    let canonical = canonicalize_value(&json_value);
    serde_json::to_string(&canonical).map_err(|e| CanonicalError::SerializationError(e.to_string()))
}

fn canonicalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut btree = BTreeMap::new();
            for (k, v) in map {
                btree.insert(k.clone(), canonicalize_value(v));
            }
            serde_json::Value::Object(btree.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(canonicalize_value).collect())
        }
        other => other.clone(),
    }
}

/// Reject floats that cannot survive a JSON round trip.
pub fn ensure_finite(label: &str, values: impl IntoIterator<Item = f64>) -> Result<(), CanonicalError> {
    for (i, v) in values.into_iter().enumerate() {
        if !v.is_finite() {
            return Err(CanonicalError::NonFinite(format!("{label}[{i}]")));
        }
    }
    Ok(())
}

/// Compute Blake3 hash of canonical JSON representation
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<[u8; 32], CanonicalError> {
    let json = to_canonical_json(value)?;
    let hash = blake3::hash(json.as_bytes());
    Ok(*hash.as_bytes())
}

/// Compute Blake3 hash and return as hex string
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let hash = hash_canonical(value)?;
    Ok(hex::encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Columns {
        weight: f64,
        age: f64,
        gender: String,
    }

    #[test]
    fn test_keys_sorted_without_whitespace() {
        let data = Columns {
            weight: 81.5,
            age: 23.0,
            gender: "Female".to_string(),
        };

        let json = to_canonical_json(&data).unwrap();
        assert_eq!(json, r#"{"age":23.0,"gender":"Female","weight":81.5}"#);
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Columns {
            weight: 81.5,
            age: 23.0,
            gender: "Female".to_string(),
        };
        let b = Columns {
            weight: 81.6,
            age: 23.0,
            gender: "Female".to_string(),
        };

        let ha = hash_canonical_hex(&a).unwrap();
        assert_eq!(ha, hash_canonical_hex(&a).unwrap());
        assert_eq!(ha.len(), 64);
        assert_ne!(ha, hash_canonical_hex(&b).unwrap());
    }

    #[test]
    fn test_nested_maps_sorted() {
        let mut inner = BTreeMap::new();
        inner.insert("z", 1);
        inner.insert("a", 2);
        let mut outer = std::collections::HashMap::new();
        outer.insert("outer_b", inner.clone());
        outer.insert("outer_a", inner);

        let json = to_canonical_json(&outer).unwrap();
        assert!(json.find("outer_a").unwrap() < json.find("outer_b").unwrap());
    }

    #[test]
    fn test_ensure_finite_names_position() {
        assert!(ensure_finite("center", [1.0, 2.0]).is_ok());
        let err = ensure_finite("center", [1.0, f64::NAN]).unwrap_err();
        assert_eq!(err, CanonicalError::NonFinite("center[1]".into()));
    }
}

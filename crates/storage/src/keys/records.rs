//! Persisted key records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A generated key and the time it was created, in epoch milliseconds.
///
/// Used for dynamic access-token signing keys (`value` is the encoded key
/// pair) and for the refresh-token key (`value` is the symmetric secret).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueInfo {
    /// Encoded key material.
    pub value: String,
    /// Creation time in epoch milliseconds.
    pub created_at_time: i64,
}

impl KeyValueInfo {
    /// Creates a new record.
    pub fn new(value: impl Into<String>, created_at_time: i64) -> Self {
        Self { value: value.into(), created_at_time }
    }
}

impl fmt::Debug for KeyValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueInfo")
            .field("value", &"[REDACTED]")
            .field("created_at_time", &self.created_at_time)
            .finish()
    }
}

/// A [`KeyValueInfo`] together with the opaque token the optimistic write
/// path compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueInfoWithLastUpdated {
    /// The stored record.
    #[serde(flatten)]
    pub info: KeyValueInfo,
    /// Changes on every write.
    pub last_updated_sign: String,
}

/// A static (non-rotating) JWT signing key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtSigningKeyInfo {
    /// Key id, `s-<uuid>`.
    pub key_id: String,
    /// Encoded key pair.
    pub key_string: String,
    /// JWS algorithm name, e.g. `RS256`.
    pub algorithm: String,
    /// Creation time in epoch milliseconds.
    pub created_at_time: i64,
}

impl fmt::Debug for JwtSigningKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSigningKeyInfo")
            .field("key_id", &self.key_id)
            .field("key_string", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("created_at_time", &self.created_at_time)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key_material() {
        let info = KeyValueInfo::new("super-secret", 42);
        let rendered = format!("{info:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("42"));

        let jwt = JwtSigningKeyInfo {
            key_id: "s-1".into(),
            key_string: "also-secret".into(),
            algorithm: "RS256".into(),
            created_at_time: 7,
        };
        assert!(!format!("{jwt:?}").contains("also-secret"));
    }

    #[test]
    fn test_last_updated_is_flattened() {
        let record = KeyValueInfoWithLastUpdated {
            info: KeyValueInfo::new("k", 1),
            last_updated_sign: "sig".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["value"], "k");
        assert_eq!(json["createdAtTime"], 1);
        assert_eq!(json["lastUpdatedSign"], "sig");
    }
}

//! JWKS export.
//!
//! Verifiers outside this process fetch the public half of every key that
//! may have signed a live token.

use serde::{Deserialize, Serialize};

use super::{SigningKeyRecord, keypair};
use crate::error::Result;

/// One public key in JWK form.
///
/// Only the standard members are serialized; creation and expiry times are
/// kept alongside for callers that set cache headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `RSA`.
    pub kty: String,
    /// Key id as written in V3 token headers.
    pub kid: String,
    /// Modulus, unsigned big-endian base64url.
    pub n: String,
    /// Public exponent, unsigned big-endian base64url.
    pub e: String,
    /// JWS algorithm.
    pub alg: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Creation time of the key in epoch milliseconds.
    #[serde(skip)]
    pub created_at_time: i64,
    /// Time after which the key no longer verifies. `None` for static keys.
    #[serde(skip)]
    pub expiry_time: Option<i64>,
}

impl Jwk {
    /// The JWK of `record`'s public key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyMaterial`](crate::AuthError::InvalidKeyMaterial)
    /// if the stored key cannot be parsed.
    pub fn from_record(record: &SigningKeyRecord) -> Result<Self> {
        let (n, e) = keypair::public_components(&keypair::public_key(&record.value)?);
        Ok(Self {
            kty: "RSA".to_owned(),
            kid: record.key_id.clone(),
            n,
            e,
            alg: record.algorithm.as_str().to_owned(),
            key_use: "sig".to_owned(),
            created_at_time: record.created_at_time,
            expiry_time: record.expiry_time,
        })
    }
}

/// A JWK set, serialized as `{"keys": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys.
    pub keys: Vec<Jwk>,
}

//! Signing key lifecycle.
//!
//! Three key families exist per app, each created lazily and exactly once
//! across every process sharing the app's storage:
//!
//! - [`AccessTokenSigningKey`]: rotating ("dynamic") RSA keys that sign
//!   access tokens by default.
//! - [`RefreshTokenKey`]: one symmetric secret for refresh tokens.
//! - [`JwtSigningKey`]: one non-rotating ("static") RSA key per algorithm.
//!
//! [`SigningKeys`] caches the dynamic and static lists together for the
//! token codec, and [`SigningKeyManager`] is the per-process entry point that
//! resolves an app to its instances through the
//! [`TenantResourceRegistry`](crate::registry::TenantResourceRegistry).
//!
//! Creation follows the protocol of the app's [`KeyStorage`](sessionkit_storage::KeyStorage)
//! binding: inside a transaction (a losing writer fails at commit and
//! re-reads the winner's key) or through a conditional write retried until it
//! either wins or observes a usable key.

mod access_token;
mod cache;
pub mod jwks;
pub mod keypair;
mod jwt_signing_key;
mod manager;
mod refresh_token;

use std::fmt;

pub use access_token::{
    AccessTokenSigningKey, DEFAULT_SIGNING_KEY_OVERLAP, MAX_TRANSACTION_RETRIES,
};
pub use cache::SigningKeys;
pub use jwks::Jwk;
pub use jwt_signing_key::JwtSigningKey;
pub use manager::SigningKeyManager;
pub use refresh_token::RefreshTokenKey;

use crate::validation::SupportedAlgorithm;

/// A key usable for signing or verifying access tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKeyRecord {
    /// `d-<created_at_time>` for dynamic keys, `s-<uuid>` for static keys.
    pub key_id: String,
    /// Key string, see [`keypair`].
    pub value: String,
    /// Creation time in epoch milliseconds.
    pub created_at_time: i64,
    /// Time after which a dynamic key no longer verifies. `None` for static
    /// keys.
    pub expiry_time: Option<i64>,
    /// Signing algorithm.
    pub algorithm: SupportedAlgorithm,
    /// Whether the key was provisioned once and never rotates.
    pub is_static: bool,
}

impl SigningKeyRecord {
    /// `true` if the key may still verify tokens at `now`.
    #[must_use]
    pub fn is_verifiable_at(&self, now: i64) -> bool {
        self.expiry_time.is_none_or(|expiry| expiry >= now)
    }
}

impl fmt::Debug for SigningKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyRecord")
            .field("key_id", &self.key_id)
            .field("value", &"[REDACTED]")
            .field("created_at_time", &self.created_at_time)
            .field("expiry_time", &self.expiry_time)
            .field("algorithm", &self.algorithm)
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// Current time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

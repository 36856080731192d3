//! Versioned access tokens.
//!
//! Three wire generations are issued and accepted side by side; see
//! [`TokenVersion`]. Verification never reports why a token was rejected:
//! every problem with the token itself collapses into
//! [`VerifyOutcome::MustRefresh`], the one recovery a client can take.

mod claims;
mod codec;
pub mod jwt;

pub use claims::{AccessTokenClaims, PROTECTED_CLAIMS, TokenVersion, V1Claims, V2Claims, V3Claims, VersionedClaims};
pub use codec::{
    AccessTokenCodec, AccessTokenInfo, DEFAULT_KEY_CACHE_CAPACITY, DEFAULT_KEY_CACHE_TTL,
    NewAccessToken, TokenInfo,
};

use crate::error::AuthError;

/// Result of verifying a presented access token.
#[derive(Debug)]
#[must_use]
pub enum VerifyOutcome {
    /// Signature, layout and expiry checked out.
    Verified(AccessTokenInfo),
    /// The token is unusable; the client should refresh its session.
    MustRefresh,
    /// Verification could not be completed, e.g. storage was unavailable or
    /// the tenant is unknown.
    HardError(AuthError),
}

impl VerifyOutcome {
    /// `true` for [`VerifyOutcome::MustRefresh`].
    #[must_use]
    pub fn is_must_refresh(&self) -> bool {
        matches!(self, Self::MustRefresh)
    }

    /// The decoded token, if verified.
    #[must_use]
    pub fn verified(self) -> Option<AccessTokenInfo> {
        match self {
            Self::Verified(info) => Some(info),
            _ => None,
        }
    }
}

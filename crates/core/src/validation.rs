//! Signing algorithm validation.
//!
//! Tokens are signed and verified with asymmetric keys only. The header
//! algorithm of a presented token is checked before any key is looked up so
//! that an algorithm-substitution attempt never reaches signature
//! verification.

use std::{fmt, str::FromStr};

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Algorithms that are never accepted.
///
/// - `none`: No signature verification (trivially bypassable)
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms (shared secret vulnerability)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms keys can be generated for and tokens signed with.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256"];

/// A signing algorithm this crate generates keys for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256 over a 2048-bit key.
    Rs256,
}

impl SupportedAlgorithm {
    /// Every supported algorithm.
    pub const ALL: &'static [SupportedAlgorithm] = &[SupportedAlgorithm::Rs256];

    /// JWS name, as written in token headers and JWKS entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
        }
    }

    /// The matching `jsonwebtoken` algorithm.
    #[must_use]
    pub fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::Rs256 => Algorithm::RS256,
        }
    }
}

impl fmt::Display for SupportedAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportedAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_algorithm(s)
    }
}

/// Validate a JWS algorithm name against security policy.
///
/// Accepted names must match exactly (`RS256`, not `rs256`). Forbidden names
/// are recognised in any case so their rejection names the security reason.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is symmetric (HS256, HS384, HS512)
/// - Algorithm is "none"
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use sessionkit_core::validation::{SupportedAlgorithm, validate_algorithm};
///
/// assert_eq!(validate_algorithm("RS256").unwrap(), SupportedAlgorithm::Rs256);
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("ES256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<SupportedAlgorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    SupportedAlgorithm::ALL.iter().copied().find(|a| a.as_str() == alg).ok_or_else(
        || {
            AuthError::unsupported_algorithm(format!(
                "Algorithm '{alg}' is not in accepted list (only RS256 is supported)"
            ))
        },
    )
}

//! Access token claims and their three wire layouts.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};

/// Claim names a V3 token reserves for itself. User data may not use them.
pub const PROTECTED_CLAIMS: &[&str] = &[
    "sub",
    "exp",
    "iat",
    "sessionHandle",
    "refreshTokenHash1",
    "parentRefreshTokenHash1",
    "antiCsrfToken",
];

/// Access token wire format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenVersion {
    /// Millisecond timestamps, absent optional claims omitted.
    V1,
    /// Millisecond timestamps, absent optional claims written as `null`.
    V2,
    /// Standard second-precision claims, user data flattened, `kid` header.
    V3,
}

impl TokenVersion {
    /// The version new tokens are issued with by default.
    pub const LATEST: Self = Self::V3;

    /// Value of the `version` header.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
            Self::V3 => "3",
        }
    }

    /// Whether the header names the signing key.
    #[must_use]
    pub fn has_key_id(self) -> bool {
        self >= Self::V3
    }
}

impl fmt::Display for TokenVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_str())
    }
}

impl FromStr for TokenVersion {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1" => Ok(Self::V1),
            "2" => Ok(Self::V2),
            "3" => Ok(Self::V3),
            other => Err(AuthError::invalid_token_format(format!("unknown token version '{other}'"))),
        }
    }
}

/// The claims of an access token, independent of wire format.
///
/// Timestamps are epoch milliseconds. A V3 token carries whole seconds, so
/// both timestamps come back truncated after a V3 round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenClaims {
    /// Session this token belongs to.
    pub session_handle: String,
    /// Subject.
    pub user_id: String,
    /// Hash of the refresh token issued alongside.
    pub refresh_token_hash1: String,
    /// Hash of the refresh token this session was rotated from.
    pub parent_refresh_token_hash1: Option<String>,
    /// Anti-CSRF token, present when the session enforces it.
    pub anti_csrf_token: Option<String>,
    /// Expiry time.
    pub expiry_time: i64,
    /// Issue time.
    pub time_created: i64,
    /// Custom claims.
    pub user_data: Map<String, Value>,
}

/// V1 payload. Absent optional claims are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Claims {
    session_handle: String,
    user_id: String,
    refresh_token_hash1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_refresh_token_hash1: Option<String>,
    user_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anti_csrf_token: Option<String>,
    expiry_time: i64,
    time_created: i64,
}

/// V2 payload. Same fields as V1, absent optional claims written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2Claims {
    session_handle: String,
    user_id: String,
    refresh_token_hash1: String,
    #[serde(default)]
    parent_refresh_token_hash1: Option<String>,
    user_data: Map<String, Value>,
    #[serde(default)]
    anti_csrf_token: Option<String>,
    expiry_time: i64,
    time_created: i64,
}

/// V3 payload. Standard claims in seconds, user data at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V3Claims {
    sub: String,
    exp: i64,
    iat: i64,
    session_handle: String,
    refresh_token_hash1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_refresh_token_hash1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anti_csrf_token: Option<String>,
    #[serde(flatten)]
    user_data: Map<String, Value>,
}

/// Claims in the layout of one wire version.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedClaims {
    /// See [`V1Claims`].
    V1(V1Claims),
    /// See [`V2Claims`].
    V2(V2Claims),
    /// See [`V3Claims`].
    V3(V3Claims),
}

fn seconds(millis: i64) -> i64 {
    millis.div_euclid(1000)
}

impl VersionedClaims {
    /// Lays `claims` out for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProtectedClaim`] if a V3 token's user data uses a
    /// name from [`PROTECTED_CLAIMS`].
    pub fn new(version: TokenVersion, claims: AccessTokenClaims) -> Result<Self> {
        let AccessTokenClaims {
            session_handle,
            user_id,
            refresh_token_hash1,
            parent_refresh_token_hash1,
            anti_csrf_token,
            expiry_time,
            time_created,
            user_data,
        } = claims;

        Ok(match version {
            TokenVersion::V1 => Self::V1(V1Claims {
                session_handle,
                user_id,
                refresh_token_hash1,
                parent_refresh_token_hash1,
                user_data,
                anti_csrf_token,
                expiry_time,
                time_created,
            }),
            TokenVersion::V2 => Self::V2(V2Claims {
                session_handle,
                user_id,
                refresh_token_hash1,
                parent_refresh_token_hash1,
                user_data,
                anti_csrf_token,
                expiry_time,
                time_created,
            }),
            TokenVersion::V3 => {
                if let Some(name) = PROTECTED_CLAIMS.iter().find(|name| user_data.contains_key(**name)) {
                    return Err(AuthError::protected_claim(*name));
                }
                Self::V3(V3Claims {
                    sub: user_id,
                    exp: seconds(expiry_time),
                    iat: seconds(time_created),
                    session_handle,
                    refresh_token_hash1,
                    parent_refresh_token_hash1,
                    anti_csrf_token,
                    user_data,
                })
            },
        })
    }

    /// The wire version of this layout.
    #[must_use]
    pub fn version(&self) -> TokenVersion {
        match self {
            Self::V1(_) => TokenVersion::V1,
            Self::V2(_) => TokenVersion::V2,
            Self::V3(_) => TokenVersion::V3,
        }
    }

    /// Serialized payload.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            Self::V1(c) => serde_json::to_vec(c),
            Self::V2(c) => serde_json::to_vec(c),
            Self::V3(c) => serde_json::to_vec(c),
        };
        encoded.map_err(|e| AuthError::invalid_token_format(format!("failed to encode claims: {e}")))
    }

    /// Parses a payload in the layout of `version`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if the payload is not JSON
    /// or lacks a claim `version` requires.
    pub fn from_json(version: TokenVersion, payload: &[u8]) -> Result<Self> {
        let decoded = match version {
            TokenVersion::V1 => serde_json::from_slice(payload).map(Self::V1),
            TokenVersion::V2 => serde_json::from_slice(payload).map(Self::V2),
            TokenVersion::V3 => serde_json::from_slice(payload).map(Self::V3),
        };
        decoded.map_err(|e| {
            AuthError::invalid_token_format(format!("payload does not match {version} layout: {e}"))
        })
    }

    /// The format-independent claims.
    #[must_use]
    pub fn into_claims(self) -> AccessTokenClaims {
        match self {
            Self::V1(c) => AccessTokenClaims {
                session_handle: c.session_handle,
                user_id: c.user_id,
                refresh_token_hash1: c.refresh_token_hash1,
                parent_refresh_token_hash1: c.parent_refresh_token_hash1,
                anti_csrf_token: c.anti_csrf_token,
                expiry_time: c.expiry_time,
                time_created: c.time_created,
                user_data: c.user_data,
            },
            Self::V2(c) => AccessTokenClaims {
                session_handle: c.session_handle,
                user_id: c.user_id,
                refresh_token_hash1: c.refresh_token_hash1,
                parent_refresh_token_hash1: c.parent_refresh_token_hash1,
                anti_csrf_token: c.anti_csrf_token,
                expiry_time: c.expiry_time,
                time_created: c.time_created,
                user_data: c.user_data,
            },
            Self::V3(c) => AccessTokenClaims {
                session_handle: c.session_handle,
                user_id: c.sub,
                refresh_token_hash1: c.refresh_token_hash1,
                parent_refresh_token_hash1: c.parent_refresh_token_hash1,
                anti_csrf_token: c.anti_csrf_token,
                expiry_time: c.exp.saturating_mul(1000),
                time_created: c.iat.saturating_mul(1000),
                user_data: c.user_data,
            },
        }
    }
}

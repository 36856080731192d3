//! Error types for the auth core.
//!
//! [`AuthError`] covers key management and token handling, [`ConfigError`]
//! covers invalid configuration, and [`TenancyError`] covers tenant mutation.
//! Token verification itself never surfaces a granular [`AuthError`] to its
//! caller; see [`VerifyOutcome`](crate::token::VerifyOutcome).

use std::fmt;

use sessionkit_storage::StorageError;
use thiserror::Error;

/// Key management and token errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases without a
/// semver-breaking change. Downstream match expressions must include a
/// wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed token - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Signature verification failed against every candidate key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// User data of a V3 token uses a name reserved for a standard claim.
    #[error("User data must not contain protected claim: {0}")]
    ProtectedClaim(String),

    /// No cached or stored key carries this key id.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Stored key material could not be parsed or used.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Generating a key pair failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// The tenant or app has no resources bound in this process.
    #[error("Tenant or app not found: {0}")]
    TenantOrAppNotFound(String),

    /// The tenant's effective config is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Storage backend error during key lookup or creation.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for debugging and structured logging.
    #[error("Key storage error: {0}")]
    KeyStorageError(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Creates an [`AuthError::InvalidTokenFormat`].
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an [`AuthError::TokenExpired`].
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates an [`AuthError::MissingClaim`].
    pub fn missing_claim(name: impl Into<String>) -> Self {
        Self::MissingClaim(name.into())
    }

    /// Creates an [`AuthError::ProtectedClaim`].
    pub fn protected_claim(name: impl Into<String>) -> Self {
        Self::ProtectedClaim(name.into())
    }

    /// Creates an [`AuthError::KeyNotFound`].
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates an [`AuthError::UnsupportedAlgorithm`].
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates an [`AuthError::InvalidKeyMaterial`].
    pub fn invalid_key_material(message: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial(message.into())
    }

    /// Creates an [`AuthError::KeyGeneration`].
    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration(message.into())
    }

    /// Creates an [`AuthError::TenantOrAppNotFound`].
    pub fn tenant_or_app_not_found(scope: impl fmt::Display) -> Self {
        Self::TenantOrAppNotFound(scope.to_string())
    }

    /// `true` for problems with the presented token itself, which a client
    /// fixes by refreshing. Everything else is an infrastructure or
    /// configuration failure.
    #[must_use]
    pub fn requires_refresh(&self) -> bool {
        matches!(
            self,
            Self::InvalidTokenFormat(_)
                | Self::TokenExpired
                | Self::InvalidSignature
                | Self::MissingClaim(_)
                | Self::ProtectedClaim(_)
                | Self::KeyNotFound { .. }
                | Self::UnsupportedAlgorithm(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                AuthError::InvalidKeyMaterial(format!("JWT key error: {err}"))
            },
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {err}")),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::KeyStorageError(err)
    }
}

/// Result type alias for key management and token operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Invalid configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field is outside its permitted range.
    #[error("Invalid config value for '{field}': {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A tenant's override object does not merge into a valid config.
    #[error("Invalid config override: {message}")]
    InvalidOverride {
        /// Description of the failure.
        message: String,
        /// The parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Creates a [`ConfigError::InvalidValue`].
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue { field, reason: reason.into() }
    }

    /// Creates a [`ConfigError::InvalidOverride`].
    pub fn invalid_override(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidOverride { message: message.into(), source }
    }
}

/// Which default scope a rejected deletion targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultScope {
    /// The public tenant of an app.
    Tenant,
    /// The public app of a connection URI domain.
    App,
    /// The base connection URI domain.
    ConnectionUriDomain,
}

impl fmt::Display for DefaultScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tenant => f.write_str("public tenant"),
            Self::App => f.write_str("public app"),
            Self::ConnectionUriDomain => f.write_str("base connection URI domain"),
        }
    }
}

/// Tenant, app and domain mutation errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Match with a wildcard
/// arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TenancyError {
    /// The source scope may not create or modify the target scope.
    #[error("Bad permission: {0}")]
    BadPermission(String),

    /// The default tenant, app or domain can never be deleted.
    #[error("Cannot delete the {kind}")]
    CannotDeleteDefault {
        /// Which default was targeted.
        kind: DefaultScope,
    },

    /// The base tenant's config comes from the process config, not from
    /// tenant operations.
    #[error("Cannot modify the base config through tenant operations")]
    CannotModifyBaseConfig,

    /// The new config does not validate.
    #[error("Invalid tenant config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The target tenant or app does not exist.
    #[error("Tenant or app not found: {0}")]
    TenantOrAppNotFound(String),

    /// Storage failed.
    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),
}

impl TenancyError {
    /// Creates a [`TenancyError::BadPermission`].
    pub fn bad_permission(message: impl Into<String>) -> Self {
        Self::BadPermission(message.into())
    }

    /// Creates a [`TenancyError::CannotDeleteDefault`].
    pub fn cannot_delete_default(kind: DefaultScope) -> Self {
        Self::CannotDeleteDefault { kind }
    }

    /// Creates a [`TenancyError::TenantOrAppNotFound`].
    pub fn tenant_or_app_not_found(scope: impl fmt::Display) -> Self {
        Self::TenantOrAppNotFound(scope.to_string())
    }
}

impl From<StorageError> for TenancyError {
    fn from(err: StorageError) -> Self {
        TenancyError::Storage(err)
    }
}

/// Result type alias for tenant mutation operations.
pub type TenancyResult<T> = std::result::Result<T, TenancyError>;

//! Shared test utilities for the auth core.
//!
//! This module provides an in-memory tenant setup, a raw token crafter for
//! attack testing and assertion macros for the crate's error enums. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! sessionkit-core = { path = "../core", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use sessionkit_core::testutil::{craft_raw_jwt, in_memory_multitenancy};
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sessionkit_storage::{KeyStorage, KvMultitenancyStorage, MemoryBackend};

use crate::{
    binding::SharedStorageProvider,
    config::CoreConfig,
    registry::TenantResourceRegistry,
    tenancy::{Multitenancy, TenantConfigCoordinator},
};

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack tokens (e.g., `alg: "none"`, a V3 header without
/// `kid`).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// A [`Multitenancy`] over a fresh [`MemoryBackend`], initialised so the base
/// tenant exists and is loaded.
///
/// Tenant configs and signing keys share the backend; keys use the
/// optimistic protocol.
///
/// # Panics
///
/// Panics if initialisation fails (should not happen with `MemoryBackend`).
pub async fn in_memory_multitenancy(base_config: CoreConfig) -> (MemoryBackend, Multitenancy) {
    let backend = MemoryBackend::new();
    let coordinator = TenantConfigCoordinator::builder()
        .registry(Arc::new(TenantResourceRegistry::new()))
        .tenant_storage(Arc::new(KvMultitenancyStorage::new(backend.clone())))
        .storage_provider(Arc::new(SharedStorageProvider::new(KeyStorage::optimistic(
            backend.clone(),
        ))))
        .base_config(base_config)
        .build();
    let multitenancy = Multitenancy::new(Arc::new(coordinator));
    multitenancy.init().await.expect("init multitenancy");
    (backend, multitenancy)
}

/// Asserts that a [`Result<T, AuthError>`](crate::AuthError) is an `Err`
/// matching the given variant pattern. The result expression is evaluated
/// once.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use sessionkit_core::{AuthError, assert_auth_error};
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $($variant:tt)+) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::AuthError::$($variant)+)),
            "expected AuthError::{}, got: {:?}",
            stringify!($($variant)+),
            result,
        );
    }};
}

/// Asserts that a [`Result<T, TenancyError>`](crate::TenancyError) is an
/// `Err` matching the given variant pattern. The result expression is
/// evaluated once.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use sessionkit_core::{TenancyError, assert_tenancy_error};
///
/// let result: Result<(), TenancyError> = Err(TenancyError::bad_permission("no"));
/// assert_tenancy_error!(result, BadPermission(_));
/// ```
#[macro_export]
macro_rules! assert_tenancy_error {
    ($result:expr, $($variant:tt)+) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::TenancyError::$($variant)+)),
            "expected TenancyError::{}, got: {:?}",
            stringify!($($variant)+),
            result,
        );
    }};
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::{AuthError, DefaultScope, TenancyError};

    #[test]
    fn test_craft_raw_jwt_has_empty_signature() {
        let jwt = craft_raw_jwt(&json!({"alg": "none"}), &json!({"sub": "u1"}));
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_multitenancy_has_base_tenant() {
        let (_, multitenancy) = in_memory_multitenancy(CoreConfig::default()).await;
        assert_eq!(multitenancy.coordinator().snapshot().len(), 1);
        assert_eq!(multitenancy.coordinator().reload_count(), 1);
    }

    #[test]
    fn test_assert_macros() {
        let expired: Result<(), AuthError> = Err(AuthError::token_expired());
        assert_auth_error!(expired, TokenExpired);

        let missing: Result<(), AuthError> = Err(AuthError::key_not_found("d-1"));
        assert_auth_error!(missing, KeyNotFound { .. });

        let denied: Result<(), TenancyError> =
            Err(TenancyError::cannot_delete_default(DefaultScope::App));
        assert_tenancy_error!(denied, CannotDeleteDefault { kind: DefaultScope::App });
    }
}

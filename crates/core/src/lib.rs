//! # sessionkit core
//!
//! Multi-tenant signing key lifecycle and versioned access tokens.
//!
//! This crate provides:
//! - **Tenant resource registry**: per-tenant singletons with scope fallback
//! - **Signing keys**: rotating dynamic keys, static keys and the refresh token key, created
//!   exactly once per app across processes sharing a database
//! - **Access tokens**: three wire versions issued and verified side by side, with one
//!   key-refresh retry on verification
//! - **Tenant config coordination**: reloads every per-tenant resource when stored tenant configs
//!   change, plus a permission-checked mutation API
//!
//! ## Features
//!
//! - Only asymmetric algorithms (RS256) are supported
//! - Token verification reports every token problem as a single "must refresh" outcome
//! - Reload failures are logged, never fatal
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sessionkit_core::{
//!     AccessTokenCodec, CoreConfig, Multitenancy, NewAccessToken, SharedStorageProvider,
//!     TenantConfigCoordinator, TenantResourceRegistry,
//! };
//! use sessionkit_storage::{KeyStorage, KvMultitenancyStorage, MemoryBackend, TenantIdentifier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let registry = Arc::new(TenantResourceRegistry::new());
//! let coordinator = TenantConfigCoordinator::builder()
//!     .registry(Arc::clone(&registry))
//!     .tenant_storage(Arc::new(KvMultitenancyStorage::new(backend.clone())))
//!     .storage_provider(Arc::new(SharedStorageProvider::new(KeyStorage::optimistic(backend))))
//!     .base_config(CoreConfig::default())
//!     .build();
//! Multitenancy::new(Arc::new(coordinator)).init().await?;
//!
//! let codec = AccessTokenCodec::builder().registry(registry).build();
//! let issued = codec
//!     .create_new_access_token(
//!         &TenantIdentifier::BASE,
//!         NewAccessToken::builder()
//!             .session_handle("s1")
//!             .user_id("u1")
//!             .refresh_token_hash1("h1")
//!             .build(),
//!     )
//!     .await?;
//!
//! let info = codec.get_info_from_access_token(&TenantIdentifier::BASE, &issued.token, false).await;
//! assert_eq!(info.verified().map(|i| i.claims.user_id), Some("u1".to_owned()));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-tenant storage bindings.
pub mod binding;
/// Core configuration.
pub mod config;
/// Periodic per-tenant maintenance.
pub mod cron;
/// Error types.
pub mod error;
/// Tenant-scoped resource registry.
pub mod registry;
/// Signing key managers and JWKS export.
pub mod signing_keys;
/// Tenant config coordination and tenant mutations.
pub mod tenancy;
/// Shared test helpers.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Versioned access tokens.
pub mod token;
/// Algorithm validation.
pub mod validation;

pub use binding::{SharedStorageProvider, StorageBinding, StorageProvider};
pub use config::CoreConfig;
pub use cron::{CleanupExpiredSigningKeys, CronTask, Cronjobs};
pub use error::{AuthError, ConfigError, DefaultScope, Result, TenancyError, TenancyResult};
pub use registry::{ScopedResource, TenantResourceRegistry};
pub use signing_keys::{SigningKeyManager, SigningKeys};
pub use tenancy::{Multitenancy, TenantConfigCoordinator};
pub use token::{AccessTokenCodec, NewAccessToken, TokenVersion, VerifyOutcome};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};

//! Storage layer for sessionkit.
//!
//! This crate provides the byte-level [`StorageBackend`] abstraction and the
//! stores the auth core persists through:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       sessionkit-core                       │
//! │   key managers │ tenant-config coordinator │ token codec    │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │ keys::{Transactional,        │ tenants::MultitenancyStorage │
//! │       Optimistic}KeyStorage  │                              │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │              StorageBackend + Transaction                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      MemoryBackend                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use sessionkit_storage::{
//!     AppIdentifier, MemoryBackend,
//!     keys::{KeyValueInfo, KvOptimisticKeyStorage, OptimisticKeyStorage},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keys = KvOptimisticKeyStorage::new(MemoryBackend::new());
//!     let app = AppIdentifier::new(None, Some("app1"));
//!
//!     let written = keys
//!         .add_access_token_signing_key_if_unchanged(&app, KeyValueInfo::new("k", 1), None)
//!         .await?;
//!     assert!(written);
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (backend factories,
//!   assertion macros). Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Storage backend trait.
pub mod backend;
/// Storage errors.
pub mod error;
mod keyspace;
/// Signing key records and key storage contracts.
pub mod keys;
/// In-memory backend.
pub mod memory;
/// Tenant config persistence.
pub mod tenants;
/// Test helpers.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Transaction trait.
pub mod transaction;
/// Scope identifiers and shared types.
pub mod types;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use keys::{
    JwtSigningKeyInfo, KeyStorage, KeyValueInfo, KeyValueInfoWithLastUpdated,
    OptimisticKeyStorage, TransactionalKeyStorage,
};
pub use memory::MemoryBackend;
pub use tenants::{KvMultitenancyStorage, MultitenancyStorage, TenantConfig};
pub use transaction::Transaction;
pub use types::{AppIdentifier, KeyValue, TenantIdentifier};

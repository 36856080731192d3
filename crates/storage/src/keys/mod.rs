//! Signing key persistence.
//!
//! Key managers talk to storage through one of two contracts, picked per
//! tenant by its storage binding ([`KeyStorage`]):
//!
//! - [`TransactionalKeyStorage`]: reads and writes go through a
//!   [`Transaction`]; a racing writer fails at commit with
//!   [`StorageError::Conflict`](crate::StorageError::Conflict) and retries.
//! - [`OptimisticKeyStorage`]: no transactions; every write is a conditional
//!   "apply if unchanged since I read it" that reports whether it won.
//!
//! Both contracts expose the same three per-app key families: dynamic
//! access-token signing keys, the refresh-token key, and static JWT signing
//! keys.

mod kv;
mod records;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
pub use kv::{KvOptimisticKeyStorage, KvTransactionalKeyStorage};
pub use records::{JwtSigningKeyInfo, KeyValueInfo, KeyValueInfoWithLastUpdated};

use crate::{backend::StorageBackend, error::StorageResult, transaction::Transaction, types::AppIdentifier};

/// Key persistence for backends with serializable transactions.
#[async_trait]
pub trait TransactionalKeyStorage: Send + Sync {
    /// Opens a transaction for one create-or-fetch attempt.
    async fn begin_transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Every stored dynamic access-token key of `app`, in insertion order.
    async fn get_access_token_signing_keys(
        &self,
        txn: &dyn Transaction,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<KeyValueInfo>>;

    /// Appends a dynamic access-token key inside `txn`.
    async fn add_access_token_signing_key(
        &self,
        txn: &mut dyn Transaction,
        app: &AppIdentifier,
        key: KeyValueInfo,
    ) -> StorageResult<()>;

    /// The refresh-token key of `app`, if one was created.
    async fn get_refresh_token_signing_key(
        &self,
        txn: &dyn Transaction,
        app: &AppIdentifier,
    ) -> StorageResult<Option<KeyValueInfo>>;

    /// Stores the refresh-token key of `app` inside `txn`.
    async fn set_refresh_token_signing_key(
        &self,
        txn: &mut dyn Transaction,
        app: &AppIdentifier,
        key: KeyValueInfo,
    ) -> StorageResult<()>;

    /// Every static JWT signing key of `app`.
    async fn get_jwt_signing_keys(
        &self,
        txn: &dyn Transaction,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<JwtSigningKeyInfo>>;

    /// Appends a static JWT signing key inside `txn`.
    async fn add_jwt_signing_key(
        &self,
        txn: &mut dyn Transaction,
        app: &AppIdentifier,
        key: JwtSigningKeyInfo,
    ) -> StorageResult<()>;

    /// Deletes dynamic keys created strictly before `time`. Returns how many
    /// were removed.
    async fn remove_access_token_signing_keys_before(
        &self,
        app: &AppIdentifier,
        time: i64,
    ) -> StorageResult<usize>;
}

/// Key persistence for backends without transactions.
#[async_trait]
pub trait OptimisticKeyStorage: Send + Sync {
    /// Every stored dynamic access-token key of `app`, in insertion order.
    async fn get_access_token_signing_keys(
        &self,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<KeyValueInfo>>;

    /// Appends `key` only if the newest stored `created_at_time` still equals
    /// `last_created` (`None`: no key stored). Returns whether it was written.
    async fn add_access_token_signing_key_if_unchanged(
        &self,
        app: &AppIdentifier,
        key: KeyValueInfo,
        last_created: Option<i64>,
    ) -> StorageResult<bool>;

    /// The refresh-token key of `app` with its write token.
    async fn get_refresh_token_signing_key(
        &self,
        app: &AppIdentifier,
    ) -> StorageResult<Option<KeyValueInfoWithLastUpdated>>;

    /// Stores the refresh-token key only if the stored write token still
    /// equals `expected_sign` (`None`: no key stored). Returns whether it was
    /// written.
    async fn set_refresh_token_signing_key_if_unchanged(
        &self,
        app: &AppIdentifier,
        key: KeyValueInfo,
        expected_sign: Option<&str>,
    ) -> StorageResult<bool>;

    /// Every static JWT signing key of `app`.
    async fn get_jwt_signing_keys(&self, app: &AppIdentifier)
    -> StorageResult<Vec<JwtSigningKeyInfo>>;

    /// Appends `key` unless a key with the same algorithm already exists.
    /// Returns whether it was written.
    async fn set_jwt_signing_key_if_no_key_for_algorithm_exists(
        &self,
        app: &AppIdentifier,
        key: JwtSigningKeyInfo,
    ) -> StorageResult<bool>;

    /// Deletes dynamic keys created strictly before `time`. Returns how many
    /// were removed.
    async fn remove_access_token_signing_keys_before(
        &self,
        app: &AppIdentifier,
        time: i64,
    ) -> StorageResult<usize>;
}

/// The key storage a tenant is bound to.
#[derive(Clone)]
pub enum KeyStorage {
    /// Writes go through transactions.
    Transactional(Arc<dyn TransactionalKeyStorage>),
    /// Writes are conditional compare-and-set operations.
    Optimistic(Arc<dyn OptimisticKeyStorage>),
}

impl KeyStorage {
    /// Transactional key storage over `backend`.
    pub fn transactional<B: StorageBackend + 'static>(backend: B) -> Self {
        Self::Transactional(Arc::new(KvTransactionalKeyStorage::new(backend)))
    }

    /// Optimistic key storage over `backend`.
    pub fn optimistic<B: StorageBackend + 'static>(backend: B) -> Self {
        Self::Optimistic(Arc::new(KvOptimisticKeyStorage::new(backend)))
    }

    /// Short name of the write protocol, for logs.
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Transactional(_) => "transactional",
            Self::Optimistic(_) => "optimistic",
        }
    }

    /// Deletes dynamic keys of `app` created strictly before `time`.
    pub async fn remove_access_token_signing_keys_before(
        &self,
        app: &AppIdentifier,
        time: i64,
    ) -> StorageResult<usize> {
        match self {
            Self::Transactional(storage) => {
                storage.remove_access_token_signing_keys_before(app, time).await
            },
            Self::Optimistic(storage) => {
                storage.remove_access_token_signing_keys_before(app, time).await
            },
        }
    }
}

impl fmt::Debug for KeyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyStorage").field(&self.protocol()).finish()
    }
}

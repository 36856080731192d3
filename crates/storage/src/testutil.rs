//! Shared test utilities for storage testing.
//!
//! Feature-gated behind `testutil` so that none of it leaks into production
//! builds.
//!
//! ```toml
//! [dev-dependencies]
//! sessionkit-storage = { path = "../storage", features = ["testutil"] }
//! ```

use crate::{
    error::{StorageError, StorageResult},
    keys::KeyStorage,
    memory::MemoryBackend,
    tenants::{KvMultitenancyStorage, MultitenancyStorage, TenantConfig},
    types::TenantIdentifier,
};

/// Shorthand for a tenant identifier with default domain.
#[must_use]
pub fn tenant(app_id: &str, tenant_id: &str) -> TenantIdentifier {
    TenantIdentifier::new(None, Some(app_id), Some(tenant_id))
}

/// Tenant config storage over a fresh [`MemoryBackend`], seeded with the base
/// tenant and `tenants`.
///
/// # Panics
///
/// Panics if seeding fails (should not happen with `MemoryBackend`).
pub async fn seeded_tenant_storage(
    tenants: &[TenantIdentifier],
) -> (MemoryBackend, KvMultitenancyStorage<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let storage = KvMultitenancyStorage::new(backend.clone());
    storage.create_tenant(&TenantConfig::new(TenantIdentifier::BASE)).await.expect("seed base");
    for tenant in tenants {
        storage.create_tenant(&TenantConfig::new(tenant.clone())).await.expect("seed tenant");
    }
    (backend, storage)
}

/// Both key storage flavours over the same fresh backend.
#[must_use]
pub fn key_storages() -> (MemoryBackend, KeyStorage, KeyStorage) {
    let backend = MemoryBackend::new();
    (backend.clone(), KeyStorage::transactional(backend.clone()), KeyStorage::optimistic(backend))
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::NotFound { .. })),
            "expected StorageError::NotFound, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// `true` if the result is a [`StorageError::Conflict`].
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_tenant_storage_includes_base() {
        let (_, storage) = seeded_tenant_storage(&[tenant("a1", "t1")]).await;
        let all = storage.get_all_tenants().await.expect("list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|c| c.tenant_identifier.is_base()));
    }

    #[test]
    fn test_key_storages_protocols() {
        let (_, txn, opt) = key_storages();
        assert_eq!(txn.protocol(), "transactional");
        assert_eq!(opt.protocol(), "optimistic");
    }

    #[test]
    fn test_assert_macros() {
        let conflict: StorageResult<()> = Err(StorageError::Conflict);
        assert_conflict!(conflict);
        assert!(is_conflict(&conflict));

        let missing: StorageResult<()> = Err(StorageError::not_found("x"));
        assert_not_found!(missing);

        let ok: StorageResult<i32> = Ok(7);
        assert_eq!(assert_storage_ok!(ok), 7);
    }
}

//! Key storage implementations over any [`StorageBackend`].
//!
//! Each key family of an app is one JSON document (see
//! [`keyspace`](crate::keyspace)). Transactional writes rewrite the document
//! inside the caller's transaction; optimistic writes rewrite it with a
//! backend compare-and-set against the exact bytes that were read.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use super::{
    JwtSigningKeyInfo, KeyValueInfo, KeyValueInfoWithLastUpdated, OptimisticKeyStorage,
    TransactionalKeyStorage,
};
use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    keyspace::{self, ACCESS_TOKEN_DYNAMIC, JWT_STATIC, REFRESH_TOKEN},
    transaction::Transaction,
    types::AppIdentifier,
};

fn decode<T: DeserializeOwned>(raw: Option<&Bytes>) -> StorageResult<Option<T>> {
    raw.map(|bytes| serde_json::from_slice(bytes)).transpose().map_err(StorageError::from)
}

fn decode_list<T: DeserializeOwned>(raw: Option<&Bytes>) -> StorageResult<Vec<T>> {
    Ok(decode::<Vec<T>>(raw)?.unwrap_or_default())
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(StorageError::from)
}

fn new_sign() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Outcome of a conditional write: `Conflict` means another writer got there
/// first.
fn won(result: StorageResult<()>) -> StorageResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(StorageError::Conflict) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn remove_before<B: StorageBackend>(
    backend: &B,
    app: &AppIdentifier,
    time: i64,
) -> StorageResult<usize> {
    let key = keyspace::app_key(app, ACCESS_TOKEN_DYNAMIC);
    loop {
        let raw = backend.get(&key).await?;
        let keys: Vec<KeyValueInfo> = decode_list(raw.as_ref())?;
        let before = keys.len();
        let kept: Vec<KeyValueInfo> =
            keys.into_iter().filter(|k| k.created_at_time >= time).collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let result = backend.compare_and_set(&key, raw.as_deref(), encode(&kept)?).await;
        if won(result)? {
            tracing::debug!(app = %app, removed, "removed expired access token signing keys");
            return Ok(removed);
        }
    }
}

/// [`TransactionalKeyStorage`] over a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct KvTransactionalKeyStorage<B> {
    backend: B,
}

impl<B: StorageBackend> KvTransactionalKeyStorage<B> {
    /// Wraps `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> TransactionalKeyStorage for KvTransactionalKeyStorage<B> {
    async fn begin_transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        self.backend.transaction().await
    }

    async fn get_access_token_signing_keys(
        &self,
        txn: &dyn Transaction,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<KeyValueInfo>> {
        let raw = txn.get(&keyspace::app_key(app, ACCESS_TOKEN_DYNAMIC)).await?;
        decode_list(raw.as_ref())
    }

    async fn add_access_token_signing_key(
        &self,
        txn: &mut dyn Transaction,
        app: &AppIdentifier,
        key: KeyValueInfo,
    ) -> StorageResult<()> {
        let storage_key = keyspace::app_key(app, ACCESS_TOKEN_DYNAMIC);
        let mut keys: Vec<KeyValueInfo> = decode_list(txn.get(&storage_key).await?.as_ref())?;
        keys.push(key);
        txn.set(storage_key, encode(&keys)?);
        Ok(())
    }

    async fn get_refresh_token_signing_key(
        &self,
        txn: &dyn Transaction,
        app: &AppIdentifier,
    ) -> StorageResult<Option<KeyValueInfo>> {
        let raw = txn.get(&keyspace::app_key(app, REFRESH_TOKEN)).await?;
        let stored: Option<KeyValueInfoWithLastUpdated> = decode(raw.as_ref())?;
        Ok(stored.map(|s| s.info))
    }

    async fn set_refresh_token_signing_key(
        &self,
        txn: &mut dyn Transaction,
        app: &AppIdentifier,
        key: KeyValueInfo,
    ) -> StorageResult<()> {
        let stored = KeyValueInfoWithLastUpdated { info: key, last_updated_sign: new_sign() };
        txn.set(keyspace::app_key(app, REFRESH_TOKEN), encode(&stored)?);
        Ok(())
    }

    async fn get_jwt_signing_keys(
        &self,
        txn: &dyn Transaction,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<JwtSigningKeyInfo>> {
        let raw = txn.get(&keyspace::app_key(app, JWT_STATIC)).await?;
        decode_list(raw.as_ref())
    }

    async fn add_jwt_signing_key(
        &self,
        txn: &mut dyn Transaction,
        app: &AppIdentifier,
        key: JwtSigningKeyInfo,
    ) -> StorageResult<()> {
        let storage_key = keyspace::app_key(app, JWT_STATIC);
        let mut keys: Vec<JwtSigningKeyInfo> =
            decode_list(txn.get(&storage_key).await?.as_ref())?;
        keys.push(key);
        txn.set(storage_key, encode(&keys)?);
        Ok(())
    }

    async fn remove_access_token_signing_keys_before(
        &self,
        app: &AppIdentifier,
        time: i64,
    ) -> StorageResult<usize> {
        remove_before(&self.backend, app, time).await
    }
}

/// [`OptimisticKeyStorage`] over a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct KvOptimisticKeyStorage<B> {
    backend: B,
}

impl<B: StorageBackend> KvOptimisticKeyStorage<B> {
    /// Wraps `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> OptimisticKeyStorage for KvOptimisticKeyStorage<B> {
    async fn get_access_token_signing_keys(
        &self,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<KeyValueInfo>> {
        let raw = self.backend.get(&keyspace::app_key(app, ACCESS_TOKEN_DYNAMIC)).await?;
        decode_list(raw.as_ref())
    }

    async fn add_access_token_signing_key_if_unchanged(
        &self,
        app: &AppIdentifier,
        key: KeyValueInfo,
        last_created: Option<i64>,
    ) -> StorageResult<bool> {
        let storage_key = keyspace::app_key(app, ACCESS_TOKEN_DYNAMIC);
        let raw = self.backend.get(&storage_key).await?;
        let mut keys: Vec<KeyValueInfo> = decode_list(raw.as_ref())?;

        let newest = keys.iter().map(|k| k.created_at_time).max();
        if newest != last_created {
            return Ok(false);
        }

        keys.push(key);
        won(self.backend.compare_and_set(&storage_key, raw.as_deref(), encode(&keys)?).await)
    }

    async fn get_refresh_token_signing_key(
        &self,
        app: &AppIdentifier,
    ) -> StorageResult<Option<KeyValueInfoWithLastUpdated>> {
        let raw = self.backend.get(&keyspace::app_key(app, REFRESH_TOKEN)).await?;
        decode(raw.as_ref())
    }

    async fn set_refresh_token_signing_key_if_unchanged(
        &self,
        app: &AppIdentifier,
        key: KeyValueInfo,
        expected_sign: Option<&str>,
    ) -> StorageResult<bool> {
        let storage_key = keyspace::app_key(app, REFRESH_TOKEN);
        let raw = self.backend.get(&storage_key).await?;
        let current: Option<KeyValueInfoWithLastUpdated> = decode(raw.as_ref())?;

        if current.as_ref().map(|c| c.last_updated_sign.as_str()) != expected_sign {
            return Ok(false);
        }

        let stored = KeyValueInfoWithLastUpdated { info: key, last_updated_sign: new_sign() };
        won(self.backend.compare_and_set(&storage_key, raw.as_deref(), encode(&stored)?).await)
    }

    async fn get_jwt_signing_keys(
        &self,
        app: &AppIdentifier,
    ) -> StorageResult<Vec<JwtSigningKeyInfo>> {
        let raw = self.backend.get(&keyspace::app_key(app, JWT_STATIC)).await?;
        decode_list(raw.as_ref())
    }

    async fn set_jwt_signing_key_if_no_key_for_algorithm_exists(
        &self,
        app: &AppIdentifier,
        key: JwtSigningKeyInfo,
    ) -> StorageResult<bool> {
        let storage_key = keyspace::app_key(app, JWT_STATIC);
        let raw = self.backend.get(&storage_key).await?;
        let mut keys: Vec<JwtSigningKeyInfo> = decode_list(raw.as_ref())?;

        if keys.iter().any(|k| k.algorithm.eq_ignore_ascii_case(&key.algorithm)) {
            return Ok(false);
        }

        keys.push(key);
        won(self.backend.compare_and_set(&storage_key, raw.as_deref(), encode(&keys)?).await)
    }

    async fn remove_access_token_signing_keys_before(
        &self,
        app: &AppIdentifier,
        time: i64,
    ) -> StorageResult<usize> {
        remove_before(&self.backend, app, time).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn app() -> AppIdentifier {
        AppIdentifier::new(None, Some("a1"))
    }

    fn jwt_key(id: &str, algorithm: &str) -> JwtSigningKeyInfo {
        JwtSigningKeyInfo {
            key_id: id.into(),
            key_string: "pub|priv".into(),
            algorithm: algorithm.into(),
            created_at_time: 1,
        }
    }

    #[tokio::test]
    async fn test_transactional_add_is_visible_after_commit() {
        let storage = KvTransactionalKeyStorage::new(MemoryBackend::new());

        let mut txn = storage.begin_transaction().await.unwrap();
        assert!(storage.get_access_token_signing_keys(&*txn, &app()).await.unwrap().is_empty());
        storage
            .add_access_token_signing_key(&mut *txn, &app(), KeyValueInfo::new("k1", 100))
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let txn = storage.begin_transaction().await.unwrap();
        let keys = storage.get_access_token_signing_keys(&*txn, &app()).await.unwrap();
        assert_eq!(keys, vec![KeyValueInfo::new("k1", 100)]);
    }

    #[tokio::test]
    async fn test_transactional_racing_creators_conflict() {
        let storage = KvTransactionalKeyStorage::new(MemoryBackend::new());

        let mut first = storage.begin_transaction().await.unwrap();
        let mut second = storage.begin_transaction().await.unwrap();
        assert!(storage.get_refresh_token_signing_key(&*first, &app()).await.unwrap().is_none());
        assert!(storage.get_refresh_token_signing_key(&*second, &app()).await.unwrap().is_none());

        storage
            .set_refresh_token_signing_key(&mut *first, &app(), KeyValueInfo::new("a", 1))
            .await
            .unwrap();
        storage
            .set_refresh_token_signing_key(&mut *second, &app(), KeyValueInfo::new("b", 2))
            .await
            .unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_optimistic_add_requires_matching_last_created() {
        let storage = KvOptimisticKeyStorage::new(MemoryBackend::new());

        assert!(
            storage
                .add_access_token_signing_key_if_unchanged(&app(), KeyValueInfo::new("k1", 10), None)
                .await
                .unwrap()
        );
        // A second contender that also saw no keys loses.
        assert!(
            !storage
                .add_access_token_signing_key_if_unchanged(&app(), KeyValueInfo::new("k2", 11), None)
                .await
                .unwrap()
        );
        assert!(
            storage
                .add_access_token_signing_key_if_unchanged(
                    &app(),
                    KeyValueInfo::new("k3", 20),
                    Some(10)
                )
                .await
                .unwrap()
        );

        let keys = storage.get_access_token_signing_keys(&app()).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_optimistic_refresh_key_sign_changes_on_write() {
        let storage = KvOptimisticKeyStorage::new(MemoryBackend::new());

        assert!(
            storage
                .set_refresh_token_signing_key_if_unchanged(&app(), KeyValueInfo::new("r1", 1), None)
                .await
                .unwrap()
        );
        let stored = storage.get_refresh_token_signing_key(&app()).await.unwrap().unwrap();
        assert_eq!(stored.info.value, "r1");

        assert!(
            !storage
                .set_refresh_token_signing_key_if_unchanged(&app(), KeyValueInfo::new("r2", 2), None)
                .await
                .unwrap()
        );
        assert!(
            storage
                .set_refresh_token_signing_key_if_unchanged(
                    &app(),
                    KeyValueInfo::new("r3", 3),
                    Some(&stored.last_updated_sign)
                )
                .await
                .unwrap()
        );
        let updated = storage.get_refresh_token_signing_key(&app()).await.unwrap().unwrap();
        assert_ne!(updated.last_updated_sign, stored.last_updated_sign);
    }

    #[tokio::test]
    async fn test_optimistic_jwt_key_one_per_algorithm() {
        let storage = KvOptimisticKeyStorage::new(MemoryBackend::new());

        assert!(
            storage
                .set_jwt_signing_key_if_no_key_for_algorithm_exists(&app(), jwt_key("s-1", "RS256"))
                .await
                .unwrap()
        );
        assert!(
            !storage
                .set_jwt_signing_key_if_no_key_for_algorithm_exists(&app(), jwt_key("s-2", "rs256"))
                .await
                .unwrap()
        );
        assert_eq!(storage.get_jwt_signing_keys(&app()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_before_keeps_newer_keys() {
        let backend = MemoryBackend::new();
        let storage = KvOptimisticKeyStorage::new(backend.clone());
        for (i, created) in [10, 20, 30].into_iter().enumerate() {
            let last = if i == 0 { None } else { Some(created - 10) };
            storage
                .add_access_token_signing_key_if_unchanged(
                    &app(),
                    KeyValueInfo::new(format!("k{i}"), created),
                    last,
                )
                .await
                .unwrap();
        }

        let transactional = KvTransactionalKeyStorage::new(backend);
        let removed = transactional.remove_access_token_signing_keys_before(&app(), 20).await.unwrap();
        assert_eq!(removed, 1);

        let remaining: Vec<i64> = storage
            .get_access_token_signing_keys(&app())
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.created_at_time)
            .collect();
        assert_eq!(remaining, vec![20, 30]);
        assert_eq!(storage.remove_access_token_signing_keys_before(&app(), 20).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_apps_are_isolated() {
        let storage = KvOptimisticKeyStorage::new(MemoryBackend::new());
        let other = AppIdentifier::new(None, Some("a2"));
        storage
            .add_access_token_signing_key_if_unchanged(&app(), KeyValueInfo::new("k", 1), None)
            .await
            .unwrap();
        assert!(storage.get_access_token_signing_keys(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_serialization_error() {
        let backend = MemoryBackend::new();
        backend
            .set(keyspace::app_key(&app(), ACCESS_TOKEN_DYNAMIC), b"not json".to_vec())
            .await
            .unwrap();
        let storage = KvOptimisticKeyStorage::new(backend);
        let result = storage.get_access_token_signing_keys(&app()).await;
        assert!(matches!(result, Err(StorageError::Serialization { .. })));
    }
}

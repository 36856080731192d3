//! Static JWT signing keys.

use sessionkit_storage::{AppIdentifier, JwtSigningKeyInfo, KeyStorage, StorageError};
use uuid::Uuid;

use super::{MAX_TRANSACTION_RETRIES, SigningKeyRecord, keypair, now_millis};
use crate::{
    error::Result,
    registry::ScopedResource,
    validation::{SupportedAlgorithm, validate_algorithm},
};

/// The static (non-rotating) signing keys of one app: at most one per
/// [`SupportedAlgorithm`], each created on first use.
pub struct JwtSigningKey {
    app: AppIdentifier,
    key_storage: KeyStorage,
}

impl ScopedResource for JwtSigningKey {
    const RESOURCE_NAME: &'static str = "jwt_signing_key";
}

fn record_with(info: &JwtSigningKeyInfo, algorithm: SupportedAlgorithm) -> SigningKeyRecord {
    SigningKeyRecord {
        key_id: info.key_id.clone(),
        value: info.key_string.clone(),
        created_at_time: info.created_at_time,
        expiry_time: None,
        algorithm,
        is_static: true,
    }
}

/// Stored algorithm names are matched in any case; token headers are not.
fn record(info: &JwtSigningKeyInfo) -> Option<SigningKeyRecord> {
    match validate_algorithm(&info.algorithm.to_ascii_uppercase()) {
        Ok(algorithm) => Some(record_with(info, algorithm)),
        Err(e) => {
            tracing::warn!(key_id = %info.key_id, error = %e, "Skipping stored static key");
            None
        },
    }
}

fn find(stored: &[JwtSigningKeyInfo], algorithm: SupportedAlgorithm) -> Option<SigningKeyRecord> {
    stored
        .iter()
        .find(|k| k.algorithm.eq_ignore_ascii_case(algorithm.as_str()))
        .map(|k| record_with(k, algorithm))
}

impl JwtSigningKey {
    /// Creates the static key family of `app`, stored in `key_storage`.
    pub fn new(app: AppIdentifier, key_storage: KeyStorage) -> Self {
        Self { app, key_storage }
    }

    fn generate(algorithm: SupportedAlgorithm) -> Result<JwtSigningKeyInfo> {
        let key_string = match algorithm {
            SupportedAlgorithm::Rs256 => keypair::generate_key_string()?,
        };
        Ok(JwtSigningKeyInfo {
            key_id: format!("s-{}", Uuid::new_v4()),
            key_string,
            algorithm: algorithm.as_str().to_owned(),
            created_at_time: now_millis(),
        })
    }

    /// The static key for `algorithm`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Storage errors propagate unchanged; key generation failures surface
    /// as [`AuthError::KeyGeneration`](crate::AuthError::KeyGeneration).
    #[tracing::instrument(skip(self), fields(app = %self.app))]
    pub async fn get_or_create_and_get_key_for_algorithm(
        &self,
        algorithm: SupportedAlgorithm,
    ) -> Result<SigningKeyRecord> {
        match &self.key_storage {
            KeyStorage::Transactional(storage) => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let mut txn = storage.begin_transaction().await?;
                    let stored = storage.get_jwt_signing_keys(&*txn, &self.app).await?;
                    let (key, created) = match find(&stored, algorithm) {
                        Some(existing) => (existing, false),
                        None => {
                            let info = Self::generate(algorithm)?;
                            storage.add_jwt_signing_key(&mut *txn, &self.app, info.clone()).await?;
                            (record_with(&info, algorithm), true)
                        },
                    };

                    match txn.commit().await {
                        Ok(()) => {
                            if created {
                                log_created(&self.app, &key.key_id);
                            }
                            return Ok(key);
                        },
                        Err(StorageError::Conflict) if attempt < MAX_TRANSACTION_RETRIES => {
                            tracing::debug!(attempt, "Static key transaction conflicted, retrying");
                        },
                        Err(e) => return Err(e.into()),
                    }
                }
            },
            KeyStorage::Optimistic(storage) => loop {
                let stored = storage.get_jwt_signing_keys(&self.app).await?;
                if let Some(existing) = find(&stored, algorithm) {
                    return Ok(existing);
                }

                let info = Self::generate(algorithm)?;
                if storage
                    .set_jwt_signing_key_if_no_key_for_algorithm_exists(&self.app, info.clone())
                    .await?
                {
                    log_created(&self.app, &info.key_id);
                    return Ok(record_with(&info, algorithm));
                }
                tracing::debug!("Lost static key write race, re-reading");
            },
        }
    }

    /// Every usable static key, newest first. When none exist yet, one is
    /// created for each supported algorithm.
    ///
    /// # Errors
    ///
    /// Storage errors propagate unchanged.
    #[tracing::instrument(skip(self), fields(app = %self.app))]
    pub async fn get_all_signing_keys(&self) -> Result<Vec<SigningKeyRecord>> {
        let mut keys: Vec<SigningKeyRecord> =
            self.read_all().await?.iter().filter_map(record).collect();

        if keys.is_empty() {
            for algorithm in SupportedAlgorithm::ALL {
                keys.push(self.get_or_create_and_get_key_for_algorithm(*algorithm).await?);
            }
        }

        keys.sort_by(|a, b| b.created_at_time.cmp(&a.created_at_time));
        Ok(keys)
    }

    async fn read_all(&self) -> Result<Vec<JwtSigningKeyInfo>> {
        match &self.key_storage {
            KeyStorage::Transactional(storage) => {
                let txn = storage.begin_transaction().await?;
                let stored = storage.get_jwt_signing_keys(&*txn, &self.app).await?;
                txn.commit().await?;
                Ok(stored)
            },
            KeyStorage::Optimistic(storage) => Ok(storage.get_jwt_signing_keys(&self.app).await?),
        }
    }
}

fn log_created(app: &AppIdentifier, key_id: &str) {
    tracing::info!(
        audit.action = "create_static_signing_key",
        audit.resource = %app,
        audit.result = "success",
        key_id,
        "audit_event"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use sessionkit_storage::{MemoryBackend, OptimisticKeyStorage, keys::KvOptimisticKeyStorage};

    use super::*;

    fn app() -> AppIdentifier {
        AppIdentifier::new(None, Some("a1"))
    }

    #[tokio::test]
    async fn test_key_for_algorithm_created_once() {
        for storage in [
            KeyStorage::transactional(MemoryBackend::new()),
            KeyStorage::optimistic(MemoryBackend::new()),
        ] {
            let keys = JwtSigningKey::new(app(), storage.clone());
            let first =
                keys.get_or_create_and_get_key_for_algorithm(SupportedAlgorithm::Rs256).await.unwrap();
            assert!(first.key_id.starts_with("s-"));
            assert!(first.is_static);
            assert_eq!(first.expiry_time, None);

            let other = JwtSigningKey::new(app(), storage);
            let second =
                other.get_or_create_and_get_key_for_algorithm(SupportedAlgorithm::Rs256).await.unwrap();
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn test_get_all_creates_one_per_algorithm() {
        let keys = JwtSigningKey::new(app(), KeyStorage::optimistic(MemoryBackend::new()));
        let all = keys.get_all_signing_keys().await.unwrap();
        assert_eq!(all.len(), SupportedAlgorithm::ALL.len());
        assert_eq!(keys.get_all_signing_keys().await.unwrap(), all);
    }

    #[tokio::test]
    async fn test_stored_key_with_unknown_algorithm_is_skipped() {
        let backend = MemoryBackend::new();
        let raw = KvOptimisticKeyStorage::new(backend.clone());
        let foreign = JwtSigningKeyInfo {
            key_id: "s-foreign".into(),
            key_string: "x|y".into(),
            algorithm: "ES256".into(),
            created_at_time: 1,
        };
        assert!(raw.set_jwt_signing_key_if_no_key_for_algorithm_exists(&app(), foreign).await.unwrap());

        let keys = JwtSigningKey::new(app(), KeyStorage::optimistic(backend));
        let all = keys.get_all_signing_keys().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].algorithm, SupportedAlgorithm::Rs256);
    }
}

//! The refresh token key.

use base64::{Engine, engine::general_purpose::STANDARD};
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use sessionkit_storage::{AppIdentifier, KeyStorage, KeyValueInfo, StorageError};
use zeroize::Zeroizing;

use super::{MAX_TRANSACTION_RETRIES, now_millis};
use crate::{error::Result, registry::ScopedResource};

const KEY_BYTES: usize = 32;

/// The symmetric secret refresh tokens of one app are protected with.
///
/// Created once per app and never rotated. The value is cached in memory
/// after the first successful read or write.
pub struct RefreshTokenKey {
    app: AppIdentifier,
    key_storage: KeyStorage,
    cached: RwLock<Option<Zeroizing<String>>>,
}

impl ScopedResource for RefreshTokenKey {
    const RESOURCE_NAME: &'static str = "refresh_token_key";
}

impl RefreshTokenKey {
    /// Creates the key holder of `app`, stored in `key_storage`.
    pub fn new(app: AppIdentifier, key_storage: KeyStorage) -> Self {
        Self { app, key_storage, cached: RwLock::new(None) }
    }

    fn generate() -> KeyValueInfo {
        let mut bytes = Zeroizing::new([0u8; KEY_BYTES]);
        OsRng.fill_bytes(&mut bytes[..]);
        KeyValueInfo::new(STANDARD.encode(&bytes[..]), now_millis())
    }

    /// The key, creating it on first use.
    ///
    /// # Errors
    ///
    /// Storage errors propagate unchanged.
    #[tracing::instrument(skip(self), fields(app = %self.app))]
    pub async fn get_key(&self) -> Result<String> {
        let cached = self.cached.read().as_ref().map(|key| key.as_str().to_owned());
        if let Some(key) = cached {
            return Ok(key);
        }

        let key = self.get_or_create().await?;
        *self.cached.write() = Some(Zeroizing::new(key.clone()));
        Ok(key)
    }

    async fn get_or_create(&self) -> Result<String> {
        match &self.key_storage {
            KeyStorage::Transactional(storage) => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let mut txn = storage.begin_transaction().await?;
                    let (value, created) =
                        match storage.get_refresh_token_signing_key(&*txn, &self.app).await? {
                            Some(existing) => (existing.value, false),
                            None => {
                                let key = Self::generate();
                                storage
                                    .set_refresh_token_signing_key(&mut *txn, &self.app, key.clone())
                                    .await?;
                                (key.value, true)
                            },
                        };

                    match txn.commit().await {
                        Ok(()) => {
                            if created {
                                log_created(&self.app);
                            }
                            return Ok(value);
                        },
                        Err(StorageError::Conflict) if attempt < MAX_TRANSACTION_RETRIES => {
                            tracing::debug!(attempt, "Refresh key transaction conflicted, retrying");
                        },
                        Err(e) => return Err(e.into()),
                    }
                }
            },
            KeyStorage::Optimistic(storage) => loop {
                let current = storage.get_refresh_token_signing_key(&self.app).await?;
                if let Some(existing) = current {
                    return Ok(existing.info.value);
                }

                let key = Self::generate();
                if storage
                    .set_refresh_token_signing_key_if_unchanged(&self.app, key.clone(), None)
                    .await?
                {
                    log_created(&self.app);
                    return Ok(key.value);
                }
                tracing::debug!("Lost refresh key write race, re-reading");
            },
        }
    }

    /// Drops the cached key without touching storage.
    pub fn invalidate_cache(&self) {
        *self.cached.write() = None;
    }
}

fn log_created(app: &AppIdentifier) {
    tracing::info!(
        audit.action = "create_refresh_token_key",
        audit.resource = %app,
        audit.result = "success",
        "audit_event"
    );
}

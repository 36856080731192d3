//! Dynamic access token signing keys.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use sessionkit_storage::{AppIdentifier, KeyStorage, KeyValueInfo, StorageError};

use super::{SigningKeyRecord, keypair, now_millis};
use crate::{
    config::{CoreConfig, duration_millis},
    error::{AuthError, Result},
    registry::ScopedResource,
    validation::SupportedAlgorithm,
};

/// Default head start a new dynamic key gets before it is used for signing,
/// so verifiers can pick it up from the JWKS first.
pub const DEFAULT_SIGNING_KEY_OVERLAP: Duration = Duration::from_secs(60);

/// Commit attempts on the transactional path before a conflict is surfaced.
pub const MAX_TRANSACTION_RETRIES: usize = 50;

/// Keys are kept for verification this many access token lifetimes past the
/// end of their signing window.
const SIGNING_KEY_VALIDITY_OVERLAP: i64 = 2;

/// The rotating RSA keys of one app.
///
/// A key signs for `update_interval - overlap` after its creation and
/// verifies for `update_interval + 2 * access_token_validity`. When no stored
/// key can sign, [`get_or_create_and_get_signing_keys`] writes a new one,
/// exactly once across every contender sharing the storage.
///
/// [`get_or_create_and_get_signing_keys`]: Self::get_or_create_and_get_signing_keys
pub struct AccessTokenSigningKey {
    app: AppIdentifier,
    key_storage: KeyStorage,
    config: Arc<CoreConfig>,
    overlap: RwLock<Option<Duration>>,
}

impl ScopedResource for AccessTokenSigningKey {
    const RESOURCE_NAME: &'static str = "access_token_signing_key";
}

impl AccessTokenSigningKey {
    /// Creates the key family of `app`, stored in `key_storage`.
    pub fn new(app: AppIdentifier, key_storage: KeyStorage, config: Arc<CoreConfig>) -> Self {
        Self { app, key_storage, config, overlap: RwLock::new(None) }
    }

    /// The owning app.
    #[must_use]
    pub fn app(&self) -> &AppIdentifier {
        &self.app
    }

    /// How long before its signing window opens a new key is created.
    ///
    /// Defaults to [`DEFAULT_SIGNING_KEY_OVERLAP`], clamped to a fifth of the
    /// update interval.
    #[must_use]
    pub fn dynamic_signing_key_overlap(&self) -> Duration {
        if let Some(overlap) = *self.overlap.read() {
            return overlap;
        }
        DEFAULT_SIGNING_KEY_OVERLAP
            .min(self.config.access_token_dynamic_signing_key_update_interval() / 5)
    }

    /// Overrides [`dynamic_signing_key_overlap`](Self::dynamic_signing_key_overlap).
    pub fn set_dynamic_signing_key_overlap(&self, overlap: Duration) {
        *self.overlap.write() = Some(overlap);
    }

    pub(crate) fn overlap_millis(&self) -> i64 {
        duration_millis(self.dynamic_signing_key_overlap())
    }

    pub(crate) fn update_interval_millis(&self) -> i64 {
        self.config.access_token_dynamic_signing_key_update_interval_millis()
    }

    /// How long a key verifies tokens after its creation, in milliseconds.
    #[must_use]
    pub fn signing_key_lifetime_millis(&self) -> i64 {
        self.update_interval_millis()
            .saturating_add(SIGNING_KEY_VALIDITY_OVERLAP * self.config.access_token_validity_millis())
    }

    fn record(&self, key: &KeyValueInfo) -> SigningKeyRecord {
        SigningKeyRecord {
            key_id: format!("d-{}", key.created_at_time),
            value: key.value.clone(),
            created_at_time: key.created_at_time,
            expiry_time: Some(key.created_at_time.saturating_add(self.signing_key_lifetime_millis())),
            algorithm: SupportedAlgorithm::Rs256,
            is_static: false,
        }
    }

    /// Stored keys that still verify at `now`, and whether one of them can
    /// sign.
    fn partition(&self, stored: &[KeyValueInfo], now: i64) -> (Vec<SigningKeyRecord>, bool) {
        let created_after_can_verify = now - self.signing_key_lifetime_millis();
        let created_after_can_sign = now - self.update_interval_millis() + self.overlap_millis();

        let valid: Vec<SigningKeyRecord> = stored
            .iter()
            .filter(|k| k.created_at_time >= created_after_can_verify)
            .map(|k| self.record(k))
            .collect();
        let can_sign = valid.iter().any(|k| k.created_at_time >= created_after_can_sign);
        (valid, can_sign)
    }

    fn new_key() -> Result<KeyValueInfo> {
        Ok(KeyValueInfo::new(keypair::generate_key_string()?, now_millis()))
    }

    /// Every key that still verifies, newest first, creating a new key when
    /// none can sign.
    ///
    /// # Errors
    ///
    /// Storage errors propagate unchanged. On the transactional path a commit
    /// conflict is retried up to [`MAX_TRANSACTION_RETRIES`] times.
    #[tracing::instrument(skip(self), fields(app = %self.app, protocol = self.key_storage.protocol()))]
    pub async fn get_or_create_and_get_signing_keys(&self) -> Result<Vec<SigningKeyRecord>> {
        let mut keys = match &self.key_storage {
            KeyStorage::Transactional(storage) => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let mut txn = storage.begin_transaction().await?;
                    let stored = storage.get_access_token_signing_keys(&*txn, &self.app).await?;
                    let (mut valid, can_sign) = self.partition(&stored, now_millis());
                    let created = if can_sign {
                        None
                    } else {
                        let key = Self::new_key()?;
                        storage.add_access_token_signing_key(&mut *txn, &self.app, key.clone()).await?;
                        valid.push(self.record(&key));
                        Some(key.created_at_time)
                    };

                    match txn.commit().await {
                        Ok(()) => {
                            if let Some(created_at) = created {
                                log_created(&self.app, created_at);
                            }
                            break valid;
                        },
                        Err(StorageError::Conflict) if attempt < MAX_TRANSACTION_RETRIES => {
                            tracing::debug!(attempt, "Signing key transaction conflicted, retrying");
                        },
                        Err(e) => return Err(e.into()),
                    }
                }
            },
            KeyStorage::Optimistic(storage) => loop {
                let stored = storage.get_access_token_signing_keys(&self.app).await?;
                let last_created = stored.iter().map(|k| k.created_at_time).max();
                let (mut valid, can_sign) = self.partition(&stored, now_millis());
                if can_sign {
                    break valid;
                }

                let key = Self::new_key()?;
                if storage
                    .add_access_token_signing_key_if_unchanged(&self.app, key.clone(), last_created)
                    .await?
                {
                    log_created(&self.app, key.created_at_time);
                    valid.push(self.record(&key));
                    break valid;
                }
                tracing::debug!("Lost signing key write race, re-reading");
            },
        };

        keys.sort_by(|a, b| b.created_at_time.cmp(&a.created_at_time));
        Ok(keys)
    }

    /// Deletes keys that no longer verify. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Storage errors propagate unchanged.
    #[tracing::instrument(skip(self), fields(app = %self.app))]
    pub async fn clean_expired_access_token_signing_keys(&self) -> Result<usize> {
        let cutoff = now_millis() - self.signing_key_lifetime_millis();
        let removed =
            self.key_storage.remove_access_token_signing_keys_before(&self.app, cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "Removed expired access token signing keys");
        }
        Ok(removed)
    }
}

fn log_created(app: &AppIdentifier, created_at: i64) {
    tracing::info!(
        audit.action = "create_signing_key",
        audit.resource = %app,
        audit.result = "success",
        key_id = %format_args!("d-{created_at}"),
        "audit_event"
    );
}

//! The per-app signing key cache used by the token codec.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use sessionkit_storage::AppIdentifier;
use tokio::sync::Mutex as AsyncMutex;

use super::{
    AccessTokenSigningKey, JwtSigningKey, SigningKeyRecord,
    jwks::{Jwk, Jwks},
    now_millis,
};
use crate::{
    error::{AuthError, Result},
    registry::ScopedResource,
    validation::SupportedAlgorithm,
};

type KeyList = Arc<[SigningKeyRecord]>;

/// Cached dynamic and static keys of one app.
///
/// Lists are replaced wholesale, never mutated in place. Refreshes go
/// through [`update_key_cache_if_not_changed`], which skips the storage
/// round trip when another caller already refreshed past what this caller
/// saw.
///
/// [`update_key_cache_if_not_changed`]: Self::update_key_cache_if_not_changed
pub struct SigningKeys {
    app: AppIdentifier,
    access_token_keys: Arc<AccessTokenSigningKey>,
    static_keys: Arc<JwtSigningKey>,
    dynamic: RwLock<Option<KeyList>>,
    statics: RwLock<Option<KeyList>>,
    update_lock: AsyncMutex<()>,
    fetch_count: AtomicU64,
}

impl ScopedResource for SigningKeys {
    const RESOURCE_NAME: &'static str = "signing_keys";
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys").field("app", &self.app).finish_non_exhaustive()
    }
}

fn contains(keys: &[SigningKeyRecord], key_id: &str) -> bool {
    keys.iter().any(|k| k.key_id == key_id)
}

impl SigningKeys {
    /// Creates an empty cache over the key families of `app`.
    pub fn new(
        app: AppIdentifier,
        access_token_keys: Arc<AccessTokenSigningKey>,
        static_keys: Arc<JwtSigningKey>,
    ) -> Self {
        Self {
            app,
            access_token_keys,
            static_keys,
            dynamic: RwLock::new(None),
            statics: RwLock::new(None),
            update_lock: AsyncMutex::new(()),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// The owning app.
    #[must_use]
    pub fn app(&self) -> &AppIdentifier {
        &self.app
    }

    /// How many times a key list was fetched from storage.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    async fn fetch_dynamic(&self) -> Result<KeyList> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let keys: KeyList = self.access_token_keys.get_or_create_and_get_signing_keys().await?.into();
        *self.dynamic.write() = Some(Arc::clone(&keys));
        Ok(keys)
    }

    async fn fetch_static(&self) -> Result<KeyList> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let keys: KeyList = self.static_keys.get_all_signing_keys().await?.into();
        *self.statics.write() = Some(Arc::clone(&keys));
        Ok(keys)
    }

    async fn cached_or_fetch_dynamic(&self) -> Result<KeyList> {
        let cached = self.dynamic.read().clone();
        match cached {
            Some(keys) => Ok(keys),
            None => self.fetch_dynamic().await,
        }
    }

    fn verifiable(keys: &[SigningKeyRecord], now: i64) -> Vec<SigningKeyRecord> {
        keys.iter().filter(|k| k.is_verifiable_at(now)).cloned().collect()
    }

    /// Dynamic keys that still verify, newest first.
    ///
    /// Refreshes the cache when no cached key verifies or the newest one is
    /// about to leave its signing window.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn dynamic_keys(&self) -> Result<Vec<SigningKeyRecord>> {
        let now = now_millis();
        let keys = Self::verifiable(&self.cached_or_fetch_dynamic().await?, now);

        let needs_refresh = keys.first().is_none_or(|latest| {
            now + self.access_token_keys.overlap_millis()
                > latest.created_at_time + self.access_token_keys.update_interval_millis()
        });
        if !needs_refresh {
            return Ok(keys);
        }

        self.update_key_cache_if_not_changed(&keys).await?;
        let refreshed = Self::verifiable(&self.cached_or_fetch_dynamic().await?, now_millis());
        if refreshed.is_empty() {
            return Err(AuthError::key_generation("no verifiable dynamic key after refresh"));
        }
        Ok(refreshed)
    }

    /// Static keys, newest first.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn static_keys(&self) -> Result<Vec<SigningKeyRecord>> {
        let cached = self.statics.read().clone();
        let keys = match cached {
            Some(keys) => keys,
            None => self.fetch_static().await?,
        };
        Ok(keys.to_vec())
    }

    /// Every key that may verify a token, newest first.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn all_keys(&self) -> Result<Vec<SigningKeyRecord>> {
        let mut keys = self.dynamic_keys().await?;
        keys.extend(self.static_keys().await?);
        keys.sort_by(|a, b| b.created_at_time.cmp(&a.created_at_time));
        Ok(keys)
    }

    /// The key with id `key_id`, refreshing the cache once if it is not
    /// cached.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn get_key_by_id(&self, key_id: &str) -> Result<Option<SigningKeyRecord>> {
        let keys = self.all_keys().await?;
        if let Some(key) = keys.iter().find(|k| k.key_id == key_id) {
            return Ok(Some(key.clone()));
        }
        self.update_key_cache_if_not_changed(&keys).await?;
        Ok(self.all_keys().await?.into_iter().find(|k| k.key_id == key_id))
    }

    /// The dynamic key new tokens are signed with.
    ///
    /// Right after a rotation the previous key keeps signing until the new
    /// one is older than the overlap, giving verifiers time to fetch it.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn latest_issued_dynamic_key(&self) -> Result<SigningKeyRecord> {
        let keys = self.dynamic_keys().await?;
        let now = now_millis();
        let overlap = self.access_token_keys.overlap_millis();
        let interval = self.access_token_keys.update_interval_millis();

        match keys.as_slice() {
            [latest, previous, ..]
                if latest.created_at_time + overlap > now
                    && now < previous.created_at_time + interval =>
            {
                Ok(previous.clone())
            },
            [latest, ..] => Ok(latest.clone()),
            [] => Err(AuthError::key_generation("no dynamic signing key available")),
        }
    }

    /// The static key for `algorithm`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn static_key_for_algorithm(
        &self,
        algorithm: SupportedAlgorithm,
    ) -> Result<SigningKeyRecord> {
        let key = self.static_keys.get_or_create_and_get_key_for_algorithm(algorithm).await?;
        let cached = self.all_keys().await?;
        if !contains(&cached, &key.key_id) {
            self.update_key_cache_if_not_changed(&cached).await?;
        }
        Ok(key)
    }

    /// Refetches a key list only if every key cached for it was already known
    /// to the caller (`seen`). A caller whose view is stale therefore picks
    /// up another caller's refresh instead of repeating it.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    #[tracing::instrument(skip(self, seen), fields(app = %self.app, seen = seen.len()))]
    pub async fn update_key_cache_if_not_changed(&self, seen: &[SigningKeyRecord]) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        let now = now_millis();

        let dynamic = self.dynamic.read().clone();
        let dynamic_known = dynamic.as_deref().is_none_or(|cached| {
            cached.iter().filter(|k| k.is_verifiable_at(now)).all(|k| contains(seen, &k.key_id))
        });
        if dynamic_known {
            tracing::debug!("Refreshing dynamic key cache");
            self.fetch_dynamic().await?;
        }

        let statics = self.statics.read().clone();
        let statics_known = statics
            .as_deref()
            .is_none_or(|cached| cached.iter().all(|k| contains(seen, &k.key_id)));
        if statics_known {
            tracing::debug!("Refreshing static key cache");
            self.fetch_static().await?;
        }
        Ok(())
    }

    /// Drops both cached lists without touching storage.
    pub fn invalidate_cache(&self) {
        *self.dynamic.write() = None;
        *self.statics.write() = None;
        tracing::info!(
            audit.action = "invalidate_key_cache",
            audit.resource = %self.app,
            audit.result = "success",
            "audit_event"
        );
    }

    /// Seconds verifiers may cache the JWKS before a new key can appear.
    /// Never less than one.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn cache_duration_secs(&self) -> Result<i64> {
        let keys = self.dynamic_keys().await?;
        let Some(latest) = keys.first() else {
            return Ok(1);
        };
        let left = (latest.created_at_time + self.access_token_keys.update_interval_millis()
            - self.access_token_keys.overlap_millis()
            - now_millis())
            / 1000;
        Ok(left.max(1))
    }

    /// When the key currently issuing tokens stops signing, in epoch
    /// milliseconds.
    ///
    /// # Errors
    ///
    /// Storage and key generation errors propagate unchanged.
    pub async fn dynamic_signing_key_expiry_time(&self) -> Result<i64> {
        let latest = self.latest_issued_dynamic_key().await?;
        Ok(latest.created_at_time + self.access_token_keys.update_interval_millis())
    }

    /// Public keys of every dynamic and static key.
    ///
    /// # Errors
    ///
    /// Storage errors propagate; a key whose material cannot be parsed fails
    /// the export with [`AuthError::InvalidKeyMaterial`].
    pub async fn jwks(&self) -> Result<Jwks> {
        let keys = self
            .all_keys()
            .await?
            .iter()
            .map(Jwk::from_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Jwks { keys })
    }
}

//! Issuing and verifying access tokens.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use jsonwebtoken::{DecodingKey, EncodingKey};
use moka::future::Cache;
use serde_json::{Map, Value};
use sessionkit_storage::{AppIdentifier, TenantIdentifier};

use super::{
    VerifyOutcome,
    claims::{AccessTokenClaims, TokenVersion, VersionedClaims},
    jwt::{self, PreParsedToken, TokenHeader},
};
use crate::{
    config::CoreConfig,
    error::{AuthError, Result},
    registry::TenantResourceRegistry,
    signing_keys::{SigningKeyManager, SigningKeyRecord, SigningKeys, keypair, now_millis},
    validation::SupportedAlgorithm,
};

/// Default number of parsed keys kept per direction.
pub const DEFAULT_KEY_CACHE_CAPACITY: u64 = 1_000;

/// Default lifetime of a parsed key in the cache.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

type KeyCacheKey = (AppIdentifier, String);

/// Input for [`AccessTokenCodec::create_new_access_token`].
#[derive(Debug, Clone, bon::Builder)]
pub struct NewAccessToken {
    /// Session this token belongs to.
    #[builder(into)]
    pub session_handle: String,
    /// Subject.
    #[builder(into)]
    pub user_id: String,
    /// Hash of the refresh token issued alongside.
    #[builder(into)]
    pub refresh_token_hash1: String,
    /// Hash of the refresh token this session was rotated from.
    #[builder(into)]
    pub parent_refresh_token_hash1: Option<String>,
    /// Anti-CSRF token to embed.
    #[builder(into)]
    pub anti_csrf_token: Option<String>,
    /// Custom claims.
    #[builder(default)]
    pub user_data: Map<String, Value>,
    /// Explicit expiry in epoch milliseconds. Defaults to now plus the
    /// tenant's access token validity.
    pub expiry_time: Option<i64>,
    /// Wire version to emit.
    #[builder(default = TokenVersion::LATEST)]
    pub version: TokenVersion,
    /// Sign with the app's static key instead of the latest dynamic key.
    /// Defaults to the tenant's `access_token_signing_key_dynamic` setting.
    pub use_static_key: Option<bool>,
}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// The compact token.
    pub token: String,
    /// Expiry in epoch milliseconds, as requested (not truncated).
    pub expiry: i64,
    /// Issue time in epoch milliseconds.
    pub created_time: i64,
}

/// The decoded content of an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenInfo {
    /// Wire version the token was issued with.
    pub version: TokenVersion,
    /// Claims; timestamps of V3 tokens are whole seconds.
    pub claims: AccessTokenClaims,
}

/// Encodes and verifies access tokens for every tenant of the process.
///
/// Parsed RSA keys are cached per app and key id, so verification does not
/// re-parse DER on every call.
pub struct AccessTokenCodec {
    registry: Arc<TenantResourceRegistry>,
    keys: SigningKeyManager,
    encoding_keys: Cache<KeyCacheKey, EncodingKey>,
    decoding_keys: Cache<KeyCacheKey, DecodingKey>,
    retry_count: AtomicU64,
}

#[bon::bon]
impl AccessTokenCodec {
    /// Creates a codec over `registry`.
    #[builder]
    pub fn new(
        registry: Arc<TenantResourceRegistry>,
        #[builder(default = DEFAULT_KEY_CACHE_CAPACITY)] key_cache_capacity: u64,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] key_cache_ttl: Duration,
    ) -> Self {
        Self {
            keys: SigningKeyManager::new(Arc::clone(&registry)),
            registry,
            encoding_keys: Cache::builder()
                .max_capacity(key_cache_capacity)
                .time_to_live(key_cache_ttl)
                .build(),
            decoding_keys: Cache::builder()
                .max_capacity(key_cache_capacity)
                .time_to_live(key_cache_ttl)
                .build(),
            retry_count: AtomicU64::new(0),
        }
    }
}

impl AccessTokenCodec {
    /// How many verifications needed a second round with refreshed keys.
    #[must_use]
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// The key manager this codec signs and verifies with.
    #[must_use]
    pub fn key_manager(&self) -> &SigningKeyManager {
        &self.keys
    }

    async fn encoding_key(&self, app: &AppIdentifier, key: &SigningKeyRecord) -> Result<EncodingKey> {
        let cache_key = (app.clone(), key.key_id.clone());
        if let Some(cached) = self.encoding_keys.get(&cache_key).await {
            return Ok(cached);
        }
        let parsed = keypair::encoding_key(&key.value)?;
        self.encoding_keys.insert(cache_key, parsed.clone()).await;
        Ok(parsed)
    }

    async fn decoding_key(&self, app: &AppIdentifier, key: &SigningKeyRecord) -> Result<DecodingKey> {
        let cache_key = (app.clone(), key.key_id.clone());
        if let Some(cached) = self.decoding_keys.get(&cache_key).await {
            return Ok(cached);
        }
        let parsed = keypair::decoding_key(&key.value)?;
        self.decoding_keys.insert(cache_key, parsed.clone()).await;
        Ok(parsed)
    }

    /// Issues a token for `tenant`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TenantOrAppNotFound`] if the tenant was not present at
    ///   the last tenant config reload
    /// - [`AuthError::ProtectedClaim`] if a V3 token's user data uses a
    ///   reserved claim name
    /// - storage and key generation errors, unchanged
    #[tracing::instrument(skip(self, new), fields(tenant = %tenant, version = %new.version))]
    pub async fn create_new_access_token(
        &self,
        tenant: &TenantIdentifier,
        new: NewAccessToken,
    ) -> Result<TokenInfo> {
        let config = CoreConfig::for_known_tenant(&self.registry, tenant)?;
        let app = tenant.to_app_identifier();
        let signing_keys = self.keys.signing_keys(&app)?;

        let now = now_millis();
        let expiry = new.expiry_time.unwrap_or_else(|| now + config.access_token_validity_millis());
        let versioned = VersionedClaims::new(new.version, AccessTokenClaims {
            session_handle: new.session_handle,
            user_id: new.user_id,
            refresh_token_hash1: new.refresh_token_hash1,
            parent_refresh_token_hash1: new.parent_refresh_token_hash1,
            anti_csrf_token: new.anti_csrf_token,
            expiry_time: expiry,
            time_created: now,
            user_data: new.user_data,
        })?;

        let use_static_key =
            new.use_static_key.unwrap_or(!config.is_access_token_signing_key_dynamic());
        let key = if use_static_key {
            signing_keys.static_key_for_algorithm(SupportedAlgorithm::Rs256).await?
        } else {
            signing_keys.latest_issued_dynamic_key().await?
        };

        let header = TokenHeader::new(new.version, key.algorithm, &key.key_id);
        let token =
            jwt::encode(&header, &versioned.to_json()?, &self.encoding_key(&app, &key).await?)?;
        tracing::debug!(kid = %key.key_id, is_static = key.is_static, "Issued access token");

        Ok(TokenInfo { token, expiry, created_time: now })
    }

    /// Candidate keys of `parsed`, newest first: the named key for V3, every
    /// key of the declared algorithm otherwise.
    fn candidates<'a>(
        parsed: &'a PreParsedToken,
        keys: &'a [SigningKeyRecord],
    ) -> impl Iterator<Item = &'a SigningKeyRecord> {
        keys.iter().filter(move |k| {
            k.algorithm == parsed.algorithm
                && parsed.kid.as_deref().is_none_or(|kid| k.key_id == kid)
        })
    }

    async fn find_verifying_key(
        &self,
        app: &AppIdentifier,
        parsed: &PreParsedToken,
        keys: &[SigningKeyRecord],
    ) -> Option<String> {
        for key in Self::candidates(parsed, keys) {
            let decoding_key = match self.decoding_key(app, key).await {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!(kid = %key.key_id, error = %e, "Skipping unusable verification key");
                    continue;
                },
            };
            match parsed.verify(&decoding_key) {
                Ok(true) => return Some(key.key_id.clone()),
                Ok(false) => {},
                Err(e) => tracing::warn!(kid = %key.key_id, error = %e, "Verification key rejected"),
            }
        }
        None
    }

    /// Verifies `token` for `tenant` and decodes its claims.
    ///
    /// Verification runs at most two rounds. When no cached key verifies the
    /// signature (including a V3 key id that is not cached), the key cache is
    /// refreshed once and the token is checked again; a second miss means
    /// the client must refresh.
    ///
    /// Every problem with the token itself is [`VerifyOutcome::MustRefresh`].
    /// Storage failures and unknown tenants are [`VerifyOutcome::HardError`].
    #[tracing::instrument(skip(self, token), fields(tenant = %tenant))]
    pub async fn get_info_from_access_token(
        &self,
        tenant: &TenantIdentifier,
        token: &str,
        do_anti_csrf_check: bool,
    ) -> VerifyOutcome {
        let parsed = match jwt::pre_parse(token) {
            Ok(parsed) => parsed,
            Err(e) => return must_refresh(&e),
        };
        if let Err(e) = CoreConfig::for_known_tenant(&self.registry, tenant) {
            return VerifyOutcome::HardError(e);
        }
        let app = tenant.to_app_identifier();
        let signing_keys = match self.keys.signing_keys(&app) {
            Ok(keys) => keys,
            Err(e) => return VerifyOutcome::HardError(e),
        };

        // An unknown V3 kid also gets the refreshed round: a key created by
        // another process after our last fetch is only found that way.
        match self.verify_with_one_retry(&app, &signing_keys, &parsed).await {
            Ok(Some(kid)) => tracing::debug!(kid = %kid, "Access token signature verified"),
            Ok(None) => return must_refresh(&AuthError::InvalidSignature),
            Err(e) => return VerifyOutcome::HardError(e),
        }

        match decode_verified(&parsed, do_anti_csrf_check) {
            Ok(info) => VerifyOutcome::Verified(info),
            Err(e) => must_refresh(&e),
        }
    }

    async fn verify_with_one_retry(
        &self,
        app: &AppIdentifier,
        signing_keys: &SigningKeys,
        parsed: &PreParsedToken,
    ) -> Result<Option<String>> {
        let seen = signing_keys.all_keys().await?;
        if let Some(kid) = self.find_verifying_key(app, parsed, &seen).await {
            return Ok(Some(kid));
        }

        self.retry_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            version = %parsed.version,
            kid = parsed.kid.as_deref(),
            "No cached key verified the token, retrying with refreshed keys"
        );
        signing_keys.update_key_cache_if_not_changed(&seen).await?;
        let refreshed = signing_keys.all_keys().await?;
        Ok(self.find_verifying_key(app, parsed, &refreshed).await)
    }

    /// Decodes `token` without checking its signature or expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] or
    /// [`AuthError::UnsupportedAlgorithm`] if the token cannot be parsed.
    pub fn get_info_from_access_token_without_verifying(token: &str) -> Result<AccessTokenInfo> {
        let parsed = jwt::pre_parse(token)?;
        let claims = VersionedClaims::from_json(parsed.version, &parsed.payload()?)?.into_claims();
        Ok(AccessTokenInfo { version: parsed.version, claims })
    }
}

fn decode_verified(parsed: &PreParsedToken, do_anti_csrf_check: bool) -> Result<AccessTokenInfo> {
    let claims = VersionedClaims::from_json(parsed.version, &parsed.payload()?)?.into_claims();
    if is_expired(parsed.version, claims.expiry_time, now_millis()) {
        return Err(AuthError::token_expired());
    }
    if do_anti_csrf_check && claims.anti_csrf_token.is_none() {
        return Err(AuthError::missing_claim("antiCsrfToken"));
    }
    Ok(AccessTokenInfo { version: parsed.version, claims })
}

/// V3 expiries are whole seconds on the wire, so V3 tokens are compared at
/// second granularity.
fn is_expired(version: TokenVersion, expiry_time: i64, now: i64) -> bool {
    match version {
        TokenVersion::V3 => expiry_time.div_euclid(1000) < now.div_euclid(1000),
        TokenVersion::V1 | TokenVersion::V2 => expiry_time < now,
    }
}

fn must_refresh(reason: &AuthError) -> VerifyOutcome {
    tracing::debug!(reason = %reason, "Access token rejected");
    VerifyOutcome::MustRefresh
}

//! Per-process entry point to the signing keys of every app.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use sessionkit_storage::{AppIdentifier, KeyStorage, TenantIdentifier};

use super::{AccessTokenSigningKey, JwtSigningKey, RefreshTokenKey, SigningKeyRecord, SigningKeys};
use crate::{
    binding::StorageBinding,
    config::CoreConfig,
    error::Result,
    registry::{ScopedResource, TenantResourceRegistry},
};

/// Resolves an app to its key managers.
///
/// Every per-app resource lives in the registry under the app's public
/// tenant. Accessors install missing resources lazily once the app's storage
/// binding is confirmed, so an app that was never loaded (or was deleted)
/// resolves to [`AuthError::TenantOrAppNotFound`](crate::AuthError::TenantOrAppNotFound).
#[derive(Debug, Clone)]
pub struct SigningKeyManager {
    registry: Arc<TenantResourceRegistry>,
}

impl SigningKeyManager {
    /// Creates a manager over `registry`.
    pub fn new(registry: Arc<TenantResourceRegistry>) -> Self {
        Self { registry }
    }

    fn bound(&self, app: &AppIdentifier) -> Result<(KeyStorage, Arc<CoreConfig>)> {
        let binding = StorageBinding::for_app(&self.registry, app)?;
        let config = CoreConfig::for_tenant(&self.registry, &app.as_public_tenant())?;
        Ok((binding.key_storage().clone(), config))
    }

    fn get_or_install<T: ScopedResource>(
        &self,
        app: &AppIdentifier,
        build: impl FnOnce(KeyStorage, Arc<CoreConfig>) -> T,
    ) -> Result<Arc<T>> {
        let scope = app.as_public_tenant();
        if let Some(existing) = self.registry.get_exact::<T>(&scope) {
            return Ok(existing);
        }
        let (key_storage, config) = self.bound(app)?;
        tracing::debug!(app = %app, resource = T::RESOURCE_NAME, "Installing key resource");
        Ok(self.registry.set_if_absent(scope, Arc::new(build(key_storage, config))))
    }

    /// The dynamic key family of `app`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`](crate::AuthError::TenantOrAppNotFound)
    /// if the app is not bound.
    pub fn access_token_signing_key(&self, app: &AppIdentifier) -> Result<Arc<AccessTokenSigningKey>> {
        self.get_or_install(app, |storage, config| {
            AccessTokenSigningKey::new(app.clone(), storage, config)
        })
    }

    /// The refresh token key of `app`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`](crate::AuthError::TenantOrAppNotFound)
    /// if the app is not bound.
    pub fn refresh_token_key(&self, app: &AppIdentifier) -> Result<Arc<RefreshTokenKey>> {
        self.get_or_install(app, |storage, _| RefreshTokenKey::new(app.clone(), storage))
    }

    /// The static key family of `app`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`](crate::AuthError::TenantOrAppNotFound)
    /// if the app is not bound.
    pub fn jwt_signing_key(&self, app: &AppIdentifier) -> Result<Arc<JwtSigningKey>> {
        self.get_or_install(app, |storage, _| JwtSigningKey::new(app.clone(), storage))
    }

    /// The key cache of `app`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`](crate::AuthError::TenantOrAppNotFound)
    /// if the app is not bound.
    pub fn signing_keys(&self, app: &AppIdentifier) -> Result<Arc<SigningKeys>> {
        let scope = app.as_public_tenant();
        if let Some(existing) = self.registry.get_exact::<SigningKeys>(&scope) {
            return Ok(existing);
        }
        let dynamic = self.access_token_signing_key(app)?;
        let statics = self.jwt_signing_key(app)?;
        Ok(self.registry.set_if_absent(scope, Arc::new(SigningKeys::new(app.clone(), dynamic, statics))))
    }

    /// The dynamic key new access tokens of `app` are signed with.
    ///
    /// # Errors
    ///
    /// Fails if the app is not bound; storage and key generation errors
    /// propagate unchanged.
    pub async fn get_key(&self, app: &AppIdentifier) -> Result<SigningKeyRecord> {
        self.signing_keys(app)?.latest_issued_dynamic_key().await
    }

    /// Drops the cached keys of `app` without touching storage. A no-op for
    /// apps whose keys were never loaded.
    pub fn invalidate_cache(&self, app: &AppIdentifier) {
        let scope = app.as_public_tenant();
        if let Some(keys) = self.registry.get_exact::<SigningKeys>(&scope) {
            keys.invalidate_cache();
        }
        if let Some(key) = self.registry.get_exact::<RefreshTokenKey>(&scope) {
            key.invalidate_cache();
        }
    }

    /// Reinstalls the key resources of every app in `apps`, replacing the
    /// previous set.
    ///
    /// Apps none of whose tenants appear in `changed` keep their instances,
    /// and with them their caches. Resources of apps absent from `apps` are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Fails if an app is not bound. Nothing is replaced in that case.
    #[tracing::instrument(skip_all, fields(apps = apps.len(), changed = changed.len()))]
    pub fn load_for_all_apps(&self, apps: &[AppIdentifier], changed: &[TenantIdentifier]) -> Result<()> {
        let changed_apps: BTreeSet<AppIdentifier> =
            changed.iter().map(TenantIdentifier::to_app_identifier).collect();

        let dynamic_existing = self.registry.get_all_with_resource_name::<AccessTokenSigningKey>();
        let refresh_existing = self.registry.get_all_with_resource_name::<RefreshTokenKey>();
        let static_existing = self.registry.get_all_with_resource_name::<JwtSigningKey>();
        let cache_existing = self.registry.get_all_with_resource_name::<SigningKeys>();

        let mut dynamic = HashMap::new();
        let mut refresh = HashMap::new();
        let mut statics = HashMap::new();
        let mut caches = HashMap::new();

        for app in apps {
            let scope = app.as_public_tenant();
            let keep = !changed_apps.contains(app);
            let (key_storage, config) = self.bound(app)?;

            let access_token_key = match dynamic_existing.get(&scope) {
                Some(current) if keep => Arc::clone(current),
                _ => Arc::new(AccessTokenSigningKey::new(app.clone(), key_storage.clone(), config)),
            };
            let refresh_key = match refresh_existing.get(&scope) {
                Some(current) if keep => Arc::clone(current),
                _ => Arc::new(RefreshTokenKey::new(app.clone(), key_storage.clone())),
            };
            let static_key = match static_existing.get(&scope) {
                Some(current) if keep => Arc::clone(current),
                _ => Arc::new(JwtSigningKey::new(app.clone(), key_storage)),
            };
            let cache = match cache_existing.get(&scope) {
                Some(current) if keep => Arc::clone(current),
                _ => Arc::new(SigningKeys::new(
                    app.clone(),
                    Arc::clone(&access_token_key),
                    Arc::clone(&static_key),
                )),
            };

            if !keep {
                tracing::debug!(app = %app, "Reloaded key resources");
            }
            dynamic.insert(scope.clone(), access_token_key);
            refresh.insert(scope.clone(), refresh_key);
            statics.insert(scope.clone(), static_key);
            caches.insert(scope, cache);
        }

        self.registry.replace_all(dynamic);
        self.registry.replace_all(refresh);
        self.registry.replace_all(statics);
        self.registry.replace_all(caches);
        Ok(())
    }
}

//! Per-tenant storage bindings.
//!
//! Each known tenant is bound to the [`KeyStorage`] its signing keys live in.
//! A [`StorageProvider`] decides the binding from the tenant's effective
//! config; the bindings are installed in the registry under exact scopes, so
//! a tenant that was never loaded has no binding and resolves to
//! [`AuthError::TenantOrAppNotFound`].

use std::{collections::HashMap, sync::Arc};

use sessionkit_storage::{AppIdentifier, KeyStorage, StorageError, TenantConfig, TenantIdentifier};

use crate::{
    config::CoreConfig,
    error::AuthError,
    registry::{ScopedResource, TenantResourceRegistry},
};

/// Resolves the key storage a tenant persists its signing keys in.
pub trait StorageProvider: Send + Sync {
    /// Key storage for `tenant`, given its effective config.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the storage cannot be opened.
    fn key_storage_for(
        &self,
        tenant: &TenantIdentifier,
        config: &CoreConfig,
    ) -> Result<KeyStorage, StorageError>;
}

/// Binds every tenant to the same key storage.
#[derive(Debug, Clone)]
pub struct SharedStorageProvider {
    key_storage: KeyStorage,
}

impl SharedStorageProvider {
    /// Creates a provider handing out `key_storage` to every tenant.
    pub fn new(key_storage: KeyStorage) -> Self {
        Self { key_storage }
    }
}

impl StorageProvider for SharedStorageProvider {
    fn key_storage_for(
        &self,
        _tenant: &TenantIdentifier,
        _config: &CoreConfig,
    ) -> Result<KeyStorage, StorageError> {
        Ok(self.key_storage.clone())
    }
}

/// The key storage one tenant is bound to.
#[derive(Debug)]
pub struct StorageBinding {
    key_storage: KeyStorage,
}

impl ScopedResource for StorageBinding {
    const RESOURCE_NAME: &'static str = "storage";
}

impl StorageBinding {
    /// The bound key storage.
    #[must_use]
    pub fn key_storage(&self) -> &KeyStorage {
        &self.key_storage
    }

    /// Binds `tenant` to `key_storage` unless it is already bound.
    pub fn install(
        registry: &TenantResourceRegistry,
        tenant: TenantIdentifier,
        key_storage: KeyStorage,
    ) -> Arc<Self> {
        registry.set_if_absent(tenant, Arc::new(Self { key_storage }))
    }

    /// Rebinds every tenant, replacing the previous set.
    ///
    /// Tenants absent from `changed` that already have a binding keep it;
    /// every other tenant is bound through `provider`. Must run after
    /// [`CoreConfig::load_for_all_tenants`] so the provider sees current
    /// configs.
    ///
    /// # Errors
    ///
    /// Returns the first provider or config lookup failure. Nothing is
    /// installed in that case.
    pub fn load_for_all_tenants(
        registry: &TenantResourceRegistry,
        provider: &dyn StorageProvider,
        tenants: &[TenantConfig],
        changed: &[TenantIdentifier],
    ) -> Result<(), AuthError> {
        let existing = registry.get_all_with_resource_name::<StorageBinding>();
        let mut loaded: HashMap<TenantIdentifier, Arc<StorageBinding>> = HashMap::new();

        for tenant in tenants.iter().map(|t| &t.tenant_identifier) {
            let binding = match existing.get(tenant) {
                Some(current) if !changed.contains(tenant) => Arc::clone(current),
                _ => {
                    let config = CoreConfig::for_tenant(registry, tenant)?;
                    let key_storage = provider.key_storage_for(tenant, &config)?;
                    tracing::debug!(
                        tenant = %tenant,
                        protocol = key_storage.protocol(),
                        "Bound tenant storage"
                    );
                    Arc::new(StorageBinding { key_storage })
                },
            };
            loaded.insert(tenant.clone(), binding);
        }

        registry.replace_all(loaded);
        Ok(())
    }

    /// The binding of exactly `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`] if the tenant is not bound.
    pub fn for_tenant(
        registry: &TenantResourceRegistry,
        tenant: &TenantIdentifier,
    ) -> Result<Arc<StorageBinding>, AuthError> {
        registry
            .get_exact::<StorageBinding>(tenant)
            .ok_or_else(|| AuthError::tenant_or_app_not_found(tenant))
    }

    /// The binding of `app`, i.e. of its public tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`] if the app is not bound.
    pub fn for_app(
        registry: &TenantResourceRegistry,
        app: &AppIdentifier,
    ) -> Result<Arc<StorageBinding>, AuthError> {
        Self::for_tenant(registry, &app.as_public_tenant())
    }
}

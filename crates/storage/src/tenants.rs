//! Tenant configuration persistence.
//!
//! [`MultitenancyStorage`] is the source of truth the tenant-config
//! coordinator refreshes from. [`KvMultitenancyStorage`] implements it over
//! any [`StorageBackend`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    keyspace::{self, TENANTS_PREFIX},
    types::{AppIdentifier, TenantIdentifier},
};

/// Per-tenant configuration as stored.
///
/// Equality is deep and structural: two configs are equal iff their
/// identifiers match and their `core_config` JSON objects are equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    /// Scope this config belongs to.
    pub tenant_identifier: TenantIdentifier,
    /// Config overrides layered over the base config.
    #[serde(default)]
    pub core_config: serde_json::Map<String, serde_json::Value>,
}

impl TenantConfig {
    /// A config with no overrides.
    pub fn new(tenant_identifier: TenantIdentifier) -> Self {
        Self { tenant_identifier, core_config: serde_json::Map::new() }
    }

    /// A config with the given overrides.
    pub fn with_core_config(
        tenant_identifier: TenantIdentifier,
        core_config: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self { tenant_identifier, core_config }
    }
}

/// Persistence for tenant configs.
#[async_trait]
pub trait MultitenancyStorage: Send + Sync {
    /// Every stored tenant config, ordered by identifier.
    async fn get_all_tenants(&self) -> StorageResult<Vec<TenantConfig>>;

    /// Stores a new tenant.
    ///
    /// # Errors
    ///
    /// [`StorageError::DuplicateTenant`] if the tenant already exists.
    async fn create_tenant(&self, config: &TenantConfig) -> StorageResult<()>;

    /// Replaces an existing tenant's config.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if the tenant does not exist.
    async fn overwrite_tenant_config(&self, config: &TenantConfig) -> StorageResult<()>;

    /// Deletes one tenant. Returns whether it existed.
    async fn delete_tenant_info(&self, tenant: &TenantIdentifier) -> StorageResult<bool>;

    /// Deletes every tenant of an app, and the app's keys. Returns whether
    /// anything existed.
    async fn delete_app_info(&self, app: &AppIdentifier) -> StorageResult<bool>;

    /// Deletes every tenant under a connection URI domain. Returns whether
    /// anything existed.
    async fn delete_connection_uri_domain_info(
        &self,
        connection_uri_domain: &str,
    ) -> StorageResult<bool>;
}

/// [`MultitenancyStorage`] over a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct KvMultitenancyStorage<B> {
    backend: B,
}

impl<B: StorageBackend> KvMultitenancyStorage<B> {
    /// Wraps `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: StorageBackend + 'static> KvMultitenancyStorage<B> {
    async fn delete_matching(
        &self,
        matches: impl Fn(&TenantIdentifier) -> bool + Send,
    ) -> StorageResult<Vec<TenantIdentifier>> {
        let doomed: Vec<TenantIdentifier> = self
            .get_all_tenants()
            .await?
            .into_iter()
            .map(|c| c.tenant_identifier)
            .filter(|t| matches(t))
            .collect();
        for tenant in &doomed {
            self.backend.delete(&keyspace::tenant_key(tenant)).await?;
        }
        Ok(doomed)
    }

    async fn clear_app_keys(&self, app: &AppIdentifier) -> StorageResult<()> {
        let prefix = keyspace::app_prefix(app);
        let end = keyspace::prefix_end(&prefix);
        self.backend.clear_range(prefix..end).await
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> MultitenancyStorage for KvMultitenancyStorage<B> {
    async fn get_all_tenants(&self) -> StorageResult<Vec<TenantConfig>> {
        let start = TENANTS_PREFIX.as_bytes().to_vec();
        let end = keyspace::prefix_end(&start);
        self.backend
            .get_range(start..end)
            .await?
            .iter()
            .map(|kv| serde_json::from_slice(&kv.value).map_err(StorageError::from))
            .collect()
    }

    #[tracing::instrument(skip(self, config), fields(tenant = %config.tenant_identifier))]
    async fn create_tenant(&self, config: &TenantConfig) -> StorageResult<()> {
        let key = keyspace::tenant_key(&config.tenant_identifier);
        let value = serde_json::to_vec(config)?;
        match self.backend.compare_and_set(&key, None, value).await {
            Err(StorageError::Conflict) => {
                Err(StorageError::duplicate_tenant(&config.tenant_identifier))
            },
            other => other,
        }
    }

    #[tracing::instrument(skip(self, config), fields(tenant = %config.tenant_identifier))]
    async fn overwrite_tenant_config(&self, config: &TenantConfig) -> StorageResult<()> {
        let key = keyspace::tenant_key(&config.tenant_identifier);
        let value = serde_json::to_vec(config)?;
        loop {
            let Some(current) = self.backend.get(&key).await? else {
                return Err(StorageError::not_found(config.tenant_identifier.to_string()));
            };
            match self.backend.compare_and_set(&key, Some(&current[..]), value.clone()).await {
                Err(StorageError::Conflict) => continue,
                other => return other,
            }
        }
    }

    async fn delete_tenant_info(&self, tenant: &TenantIdentifier) -> StorageResult<bool> {
        let key = keyspace::tenant_key(tenant);
        let existed = self.backend.get(&key).await?.is_some();
        self.backend.delete(&key).await?;
        Ok(existed)
    }

    async fn delete_app_info(&self, app: &AppIdentifier) -> StorageResult<bool> {
        let deleted = self.delete_matching(|t| t.to_app_identifier() == *app).await?;
        self.clear_app_keys(app).await?;
        Ok(!deleted.is_empty())
    }

    async fn delete_connection_uri_domain_info(
        &self,
        connection_uri_domain: &str,
    ) -> StorageResult<bool> {
        let domain = TenantIdentifier::new(Some(connection_uri_domain), None, None);
        let deleted = self
            .delete_matching(|t| t.connection_uri_domain() == domain.connection_uri_domain())
            .await?;

        let mut apps: Vec<AppIdentifier> =
            deleted.iter().map(TenantIdentifier::to_app_identifier).collect();
        apps.sort();
        apps.dedup();
        for app in &apps {
            self.clear_app_keys(app).await?;
        }
        Ok(!deleted.is_empty())
    }
}

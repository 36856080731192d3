//! Tenant, app and connection URI domain management.
//!
//! [`TenantConfigCoordinator`] keeps the in-process resources consistent with
//! the stored tenant configs. [`Multitenancy`] is the mutation API on top of
//! it: every write is permission-checked against the scope hierarchy, applied
//! to storage and followed by a refresh, all under the registry's refresh
//! lock.

mod coordinator;
mod permissions;

use std::{collections::BTreeSet, sync::Arc};

pub use coordinator::TenantConfigCoordinator;
pub use permissions::check_permissions_for_create_or_update;
use sessionkit_storage::{AppIdentifier, StorageError, TenantConfig, TenantIdentifier};

use crate::{
    config::override_chain,
    error::{DefaultScope, TenancyError, TenancyResult},
};

/// Creates, updates and deletes tenants, apps and domains.
#[derive(Debug, Clone)]
pub struct Multitenancy {
    coordinator: Arc<TenantConfigCoordinator>,
}

impl Multitenancy {
    /// Creates the API over `coordinator`.
    pub fn new(coordinator: Arc<TenantConfigCoordinator>) -> Self {
        Self { coordinator }
    }

    /// The underlying coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<TenantConfigCoordinator> {
        &self.coordinator
    }

    /// Stores the base tenant if it is missing and loads every tenant.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::Storage`] if the base tenant cannot be stored.
    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> TenancyResult<()> {
        let _guard = self.coordinator.registry().lock_for_refresh().await;
        match self
            .coordinator
            .tenant_storage()
            .create_tenant(&TenantConfig::new(TenantIdentifier::BASE))
            .await
        {
            Ok(()) => tracing::info!("Created base tenant"),
            Err(StorageError::DuplicateTenant { .. }) => {},
            Err(err) => return Err(err.into()),
        }
        self.coordinator.refresh_locked().await;
        Ok(())
    }

    /// Creates `config`'s tenant, or replaces its config if it exists.
    /// Returns `true` if the tenant was created.
    ///
    /// # Errors
    ///
    /// * [`TenancyError::CannotModifyBaseConfig`] for overrides on the base
    ///   tenant.
    /// * [`TenancyError::BadPermission`] if `source` may not manage the target.
    /// * [`TenancyError::TenantOrAppNotFound`] if `source` does not exist.
    /// * [`TenancyError::InvalidConfig`] if the overrides do not validate.
    /// * [`TenancyError::Storage`] if the write fails.
    #[tracing::instrument(skip(self, config), fields(tenant = %config.tenant_identifier))]
    pub async fn add_new_or_update_app_or_tenant(
        &self,
        source: &TenantIdentifier,
        config: TenantConfig,
    ) -> TenancyResult<bool> {
        let target = config.tenant_identifier.clone();
        if target.is_base() && !config.core_config.is_empty() {
            return Err(TenancyError::CannotModifyBaseConfig);
        }
        check_permissions_for_create_or_update(source, &target)?;

        let _guard = self.coordinator.registry().lock_for_refresh().await;
        if !source.is_base() && self.coordinator.get_tenant_info(source).is_none() {
            return Err(TenancyError::tenant_or_app_not_found(source));
        }
        self.check_effective_configs(&config)?;

        let storage = self.coordinator.tenant_storage();
        let created = match storage.create_tenant(&config).await {
            Ok(()) => true,
            Err(StorageError::DuplicateTenant { .. }) => {
                storage.overwrite_tenant_config(&config).await?;
                false
            },
            Err(err) => return Err(err.into()),
        };

        self.coordinator.refresh_locked().await;
        let action = if created { "create_tenant" } else { "update_tenant" };
        tracing::info!(
            audit.action = action,
            audit.resource = %target,
            audit.result = "success",
            source = %source,
            "audit_event"
        );
        Ok(created)
    }

    /// Validates the effective config of `config`'s tenant and of every
    /// tenant inheriting from it, as they would be once `config` is stored.
    fn check_effective_configs(&self, config: &TenantConfig) -> TenancyResult<()> {
        let target = &config.tenant_identifier;
        let mut tenants: Vec<TenantConfig> = self
            .coordinator
            .snapshot()
            .iter()
            .filter(|t| t.tenant_identifier != *target)
            .cloned()
            .collect();
        tenants.push(config.clone());

        let base = self.coordinator.base_config();
        for tenant in tenants.iter().map(|t| &t.tenant_identifier) {
            if override_chain(tenant).contains(target) {
                base.effective_for(&tenants, tenant)?;
            }
        }
        Ok(())
    }

    /// Deletes a non-public tenant. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// [`TenancyError::CannotDeleteDefault`] for a public tenant, before any
    /// storage call; [`TenancyError::Storage`] if the delete fails.
    #[tracing::instrument(skip(self), fields(tenant = %tenant))]
    pub async fn delete_tenant(&self, tenant: &TenantIdentifier) -> TenancyResult<bool> {
        if tenant.is_public_tenant() {
            return Err(TenancyError::cannot_delete_default(DefaultScope::Tenant));
        }

        let _guard = self.coordinator.registry().lock_for_refresh().await;
        let existed = self.coordinator.tenant_storage().delete_tenant_info(tenant).await?;
        self.coordinator.registry().clear_by_exact_scope(tenant);
        self.coordinator.refresh_locked().await;

        log_deleted("delete_tenant", tenant, existed);
        Ok(existed)
    }

    /// Deletes a non-public app. Every tenant of the app other than its
    /// public tenant must be deleted first. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// [`TenancyError::CannotDeleteDefault`] for the public app, before any
    /// storage call; [`TenancyError::BadPermission`] while other tenants of
    /// the app exist; [`TenancyError::Storage`] if the delete fails.
    #[tracing::instrument(skip(self), fields(app = %app))]
    pub async fn delete_app(&self, app: &AppIdentifier) -> TenancyResult<bool> {
        if app.app_id().is_empty() {
            return Err(TenancyError::cannot_delete_default(DefaultScope::App));
        }

        let _guard = self.coordinator.registry().lock_for_refresh().await;
        self.coordinator.refresh_locked().await;
        let tenants = coordinator::tenants_of_app(&self.coordinator.snapshot(), app);
        if tenants.len() > 1 {
            return Err(TenancyError::bad_permission(
                "Please delete all tenants except the public tenant for this app before calling \
                 the delete API",
            ));
        }

        let existed = self.coordinator.tenant_storage().delete_app_info(app).await?;
        let registry = self.coordinator.registry();
        for tenant in &tenants {
            registry.clear_by_exact_scope(&tenant.tenant_identifier);
        }
        registry.clear_by_exact_scope(&app.as_public_tenant());
        self.coordinator.refresh_locked().await;

        log_deleted("delete_app", app, existed);
        Ok(existed)
    }

    /// Deletes a non-default connection URI domain. Every app of the domain
    /// other than its public app must be deleted first. Returns whether it
    /// existed.
    ///
    /// # Errors
    ///
    /// [`TenancyError::CannotDeleteDefault`] for the base domain, before any
    /// storage call; [`TenancyError::BadPermission`] while other apps of the
    /// domain exist; [`TenancyError::Storage`] if the delete fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete_connection_uri_domain(
        &self,
        connection_uri_domain: &str,
    ) -> TenancyResult<bool> {
        let domain = AppIdentifier::new(Some(connection_uri_domain), None);
        if domain.connection_uri_domain().is_empty() {
            return Err(TenancyError::cannot_delete_default(DefaultScope::ConnectionUriDomain));
        }

        let _guard = self.coordinator.registry().lock_for_refresh().await;
        self.coordinator.refresh_locked().await;
        let tenants = coordinator::tenants_of_domain(
            &self.coordinator.snapshot(),
            Some(domain.connection_uri_domain()),
        );
        let apps: BTreeSet<AppIdentifier> =
            tenants.iter().map(|t| t.tenant_identifier.to_app_identifier()).collect();
        if apps.len() > 1 {
            return Err(TenancyError::bad_permission(
                "Please delete all apps except the public app for this connectionUriDomain \
                 before calling the delete API",
            ));
        }

        let existed = self
            .coordinator
            .tenant_storage()
            .delete_connection_uri_domain_info(domain.connection_uri_domain())
            .await?;
        let registry = self.coordinator.registry();
        for tenant in &tenants {
            registry.clear_by_exact_scope(&tenant.tenant_identifier);
        }
        registry.clear_by_exact_scope(&domain.as_public_tenant());
        self.coordinator.refresh_locked().await;

        log_deleted("delete_connection_uri_domain", &domain, existed);
        Ok(existed)
    }
}

fn log_deleted(action: &'static str, resource: &dyn std::fmt::Display, existed: bool) {
    tracing::info!(
        audit.action = action,
        audit.resource = %resource,
        audit.result = "success",
        existed,
        "audit_event"
    );
}

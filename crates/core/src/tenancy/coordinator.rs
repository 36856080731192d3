//! Keeps the per-tenant resources in step with stored tenant configs.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use sessionkit_storage::{AppIdentifier, MultitenancyStorage, TenantConfig, TenantIdentifier};

use crate::{
    binding::{StorageBinding, StorageProvider},
    config::{CoreConfig, layered_overrides},
    cron::Cronjobs,
    error::Result,
    registry::TenantResourceRegistry,
    signing_keys::SigningKeyManager,
};

/// Reloads configs, storage bindings, key managers and the cron tenant list
/// whenever the stored tenant configs change.
///
/// Refreshes run under the registry's refresh lock, so two refreshes (or a
/// refresh and a tenant mutation) never interleave. Reload failures are
/// logged and swallowed: the snapshot still advances, and the resources of
/// the last successful reload stay installed.
pub struct TenantConfigCoordinator {
    registry: Arc<TenantResourceRegistry>,
    tenant_storage: Arc<dyn MultitenancyStorage>,
    storage_provider: Arc<dyn StorageProvider>,
    base_config: CoreConfig,
    keys: SigningKeyManager,
    cronjobs: Arc<Cronjobs>,
    snapshot: RwLock<Arc<[TenantConfig]>>,
    reload_count: AtomicU64,
}

#[bon::bon]
impl TenantConfigCoordinator {
    /// Creates a coordinator. Nothing is loaded until the first
    /// [`refresh`](Self::refresh).
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry the per-tenant resources are installed in.
    /// * `tenant_storage` - Durable source of tenant configs.
    /// * `storage_provider` - Picks each tenant's key storage.
    /// * `base_config` - Process-wide config every tenant overrides (default:
    ///   [`CoreConfig::default`]).
    /// * `cronjobs` - Receives the tenant list after each reload (default: a
    ///   fresh [`Cronjobs`]).
    #[builder]
    pub fn new(
        registry: Arc<TenantResourceRegistry>,
        tenant_storage: Arc<dyn MultitenancyStorage>,
        storage_provider: Arc<dyn StorageProvider>,
        #[builder(default)] base_config: CoreConfig,
        #[builder(default = Arc::new(Cronjobs::new()))] cronjobs: Arc<Cronjobs>,
    ) -> Self {
        let keys = SigningKeyManager::new(Arc::clone(&registry));
        Self {
            registry,
            tenant_storage,
            storage_provider,
            base_config,
            keys,
            cronjobs,
            snapshot: RwLock::new(Arc::from(Vec::new())),
            reload_count: AtomicU64::new(0),
        }
    }
}

impl TenantConfigCoordinator {
    /// The registry resources are installed in.
    #[must_use]
    pub fn registry(&self) -> &Arc<TenantResourceRegistry> {
        &self.registry
    }

    /// The key manager over [`registry`](Self::registry).
    #[must_use]
    pub fn key_manager(&self) -> &SigningKeyManager {
        &self.keys
    }

    /// The process-wide base config.
    #[must_use]
    pub fn base_config(&self) -> &CoreConfig {
        &self.base_config
    }

    /// The cron collaborator.
    #[must_use]
    pub fn cronjobs(&self) -> &Arc<Cronjobs> {
        &self.cronjobs
    }

    pub(crate) fn tenant_storage(&self) -> &dyn MultitenancyStorage {
        self.tenant_storage.as_ref()
    }

    /// The tenant configs seen by the last refresh.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[TenantConfig]> {
        Arc::clone(&self.snapshot.read())
    }

    /// How many refreshes found a change and ran the reload sequence.
    #[must_use]
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    /// Re-reads the stored tenant configs and reloads every per-tenant
    /// resource if any changed.
    ///
    /// Returns the previously known tenants whose config changed or which
    /// were removed. The list is empty when nothing changed, or when the
    /// configs could not be fetched.
    pub async fn refresh(&self) -> Vec<TenantIdentifier> {
        let _guard = self.registry.lock_for_refresh().await;
        self.refresh_locked().await
    }

    /// [`refresh`](Self::refresh) for callers already holding the refresh
    /// lock.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn refresh_locked(&self) -> Vec<TenantIdentifier> {
        let fetched = match self.tenant_storage.get_all_tenants().await {
            Ok(tenants) => tenants,
            Err(err) => {
                tracing::error!(error = %err, "Failed to fetch tenant configs");
                return Vec::new();
            },
        };

        let previous = self.snapshot();
        let changed = changed_tenants(&previous, &fetched);
        let same_count = previous.len() == fetched.len();

        let current: Arc<[TenantConfig]> = Arc::from(fetched);
        *self.snapshot.write() = Arc::clone(&current);

        if changed.is_empty() && same_count {
            tracing::debug!(tenants = current.len(), "Tenant configs unchanged");
            return changed;
        }

        self.reload_count.fetch_add(1, Ordering::Relaxed);
        match self.reload(&current, &changed) {
            Ok(()) => tracing::info!(
                audit.action = "reload_tenant_configs",
                audit.resource = "tenants",
                audit.result = "success",
                tenants = current.len(),
                changed = changed.len(),
                "audit_event"
            ),
            Err(err) => tracing::error!(
                audit.action = "reload_tenant_configs",
                audit.resource = "tenants",
                audit.result = "failure",
                error = %err,
                "Tenant config reload failed; keeping previous resources"
            ),
        }
        changed
    }

    fn reload(&self, tenants: &[TenantConfig], changed: &[TenantIdentifier]) -> Result<()> {
        {
            let _span = tracing::info_span!("load_config").entered();
            CoreConfig::load_for_all_tenants(&self.registry, &self.base_config, tenants)?;
        }
        {
            let _span = tracing::info_span!("load_storage").entered();
            StorageBinding::load_for_all_tenants(
                &self.registry,
                self.storage_provider.as_ref(),
                tenants,
                changed,
            )?;
        }
        {
            let _span = tracing::info_span!("load_signing_keys").entered();
            let apps: BTreeSet<AppIdentifier> =
                tenants.iter().map(|t| t.tenant_identifier.to_app_identifier()).collect();
            let apps: Vec<AppIdentifier> = apps.into_iter().collect();
            self.keys.load_for_all_apps(&apps, changed)?;
        }
        {
            let _span = tracing::info_span!("load_cronjobs").entered();
            self.cronjobs
                .set_tenants_info(tenants.iter().map(|t| t.tenant_identifier.clone()).collect());
        }
        Ok(())
    }

    /// The config of exactly `tenant` as of the last refresh.
    #[must_use]
    pub fn get_tenant_info(&self, tenant: &TenantIdentifier) -> Option<TenantConfig> {
        self.snapshot.read().iter().find(|t| t.tenant_identifier == *tenant).cloned()
    }

    /// Every tenant config, refreshed first.
    pub async fn get_all_tenants(&self) -> Vec<TenantConfig> {
        self.refresh().await;
        self.snapshot().to_vec()
    }

    /// The configs of every tenant of `app`, refreshed first.
    pub async fn get_all_tenants_for_app(&self, app: &AppIdentifier) -> Vec<TenantConfig> {
        self.refresh().await;
        tenants_of_app(&self.snapshot(), app)
    }

    /// The configs of every app and tenant under `connection_uri_domain`,
    /// refreshed first.
    pub async fn get_all_apps_and_tenants_for_connection_uri_domain(
        &self,
        connection_uri_domain: Option<&str>,
    ) -> Vec<TenantConfig> {
        self.refresh().await;
        tenants_of_domain(&self.snapshot(), connection_uri_domain)
    }
}

impl std::fmt::Debug for TenantConfigCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConfigCoordinator")
            .field("tenants", &self.snapshot.read().len())
            .field("reload_count", &self.reload_count())
            .finish_non_exhaustive()
    }
}

/// Tenants of `previous` that are missing from `current`, or whose own or
/// inherited overrides differ in `current`.
fn changed_tenants(previous: &[TenantConfig], current: &[TenantConfig]) -> Vec<TenantIdentifier> {
    previous
        .iter()
        .filter(|old| {
            let tenant = &old.tenant_identifier;
            current.iter().find(|new| new.tenant_identifier == *tenant).is_none_or(|new| {
                new != *old
                    || layered_overrides(previous, tenant) != layered_overrides(current, tenant)
            })
        })
        .map(|old| old.tenant_identifier.clone())
        .collect()
}

pub(crate) fn tenants_of_app(tenants: &[TenantConfig], app: &AppIdentifier) -> Vec<TenantConfig> {
    tenants.iter().filter(|t| t.tenant_identifier.to_app_identifier() == *app).cloned().collect()
}

pub(crate) fn tenants_of_domain(
    tenants: &[TenantConfig],
    connection_uri_domain: Option<&str>,
) -> Vec<TenantConfig> {
    let domain = TenantIdentifier::new(connection_uri_domain, None, None);
    tenants
        .iter()
        .filter(|t| t.tenant_identifier.connection_uri_domain() == domain.connection_uri_domain())
        .cloned()
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;
    use sessionkit_storage::{KeyStorage, KvMultitenancyStorage, MemoryBackend};

    use super::*;
    use crate::binding::SharedStorageProvider;

    fn config(tenant: TenantIdentifier, overrides: serde_json::Value) -> TenantConfig {
        let serde_json::Value::Object(map) = overrides else { panic!("not an object") };
        TenantConfig::with_core_config(tenant, map)
    }

    fn coordinator() -> (TenantConfigCoordinator, Arc<KvMultitenancyStorage<MemoryBackend>>) {
        let backend = MemoryBackend::new();
        let tenants = Arc::new(KvMultitenancyStorage::new(backend.clone()));
        let coordinator = TenantConfigCoordinator::builder()
            .registry(Arc::new(TenantResourceRegistry::new()))
            .tenant_storage(Arc::clone(&tenants) as Arc<dyn MultitenancyStorage>)
            .storage_provider(Arc::new(SharedStorageProvider::new(KeyStorage::optimistic(backend))))
            .build();
        (coordinator, tenants)
    }

    #[test]
    fn test_changed_tenants() {
        let a = TenantIdentifier::new(None, Some("a1"), None);
        let b = TenantIdentifier::new(None, Some("a2"), None);
        let previous = vec![TenantConfig::new(a.clone()), TenantConfig::new(b.clone())];

        assert!(changed_tenants(&previous, &previous).is_empty());
        assert_eq!(changed_tenants(&previous, &previous[..1]), vec![b.clone()]);

        let modified = vec![
            TenantConfig::new(a.clone()),
            config(b.clone(), json!({"access_token_validity": "10m"})),
        ];
        assert_eq!(changed_tenants(&previous, &modified), vec![b]);
        // Additions show up as a count change, not in the list.
        assert!(changed_tenants(&previous[..1], &previous).is_empty());
    }

    #[test]
    fn test_changed_app_config_marks_its_tenants() {
        let app = TenantIdentifier::new(None, Some("a1"), None);
        let child = TenantIdentifier::new(None, Some("a1"), Some("t1"));
        let unrelated = TenantIdentifier::new(None, Some("a2"), Some("t1"));
        let previous = vec![
            TenantConfig::new(app.clone()),
            TenantConfig::new(child.clone()),
            TenantConfig::new(unrelated),
        ];
        let mut current = previous.clone();
        current[0] = config(app.clone(), json!({"access_token_validity": "30m"}));

        assert_eq!(changed_tenants(&previous, &current), vec![app, child]);
    }

    #[tokio::test]
    async fn test_refresh_propagates_app_config_to_existing_tenant() {
        let (coordinator, storage) = coordinator();
        let app = TenantIdentifier::new(None, Some("a1"), None);
        let tenant = TenantIdentifier::new(None, Some("a1"), Some("t1"));
        storage.create_tenant(&TenantConfig::new(TenantIdentifier::BASE)).await.unwrap();
        storage.create_tenant(&TenantConfig::new(app.clone())).await.unwrap();
        storage.create_tenant(&TenantConfig::new(tenant.clone())).await.unwrap();
        coordinator.refresh().await;
        assert_eq!(
            CoreConfig::for_known_tenant(coordinator.registry(), &tenant)
                .unwrap()
                .access_token_validity_millis(),
            3_600_000
        );

        storage
            .overwrite_tenant_config(&config(app.clone(), json!({"access_token_validity": "30m"})))
            .await
            .unwrap();
        assert_eq!(coordinator.refresh().await, vec![app, tenant.clone()]);
        assert_eq!(
            CoreConfig::for_known_tenant(coordinator.registry(), &tenant)
                .unwrap()
                .access_token_validity_millis(),
            1_800_000
        );
    }

    #[tokio::test]
    async fn test_refresh_loads_new_tenants() {
        let (coordinator, storage) = coordinator();
        storage.create_tenant(&TenantConfig::new(TenantIdentifier::BASE)).await.unwrap();
        let app = AppIdentifier::new(None, Some("a1"));
        storage
            .create_tenant(&config(app.as_public_tenant(), json!({"access_token_validity": "10m"})))
            .await
            .unwrap();

        assert!(coordinator.refresh().await.is_empty());
        assert_eq!(coordinator.reload_count(), 1);
        assert_eq!(coordinator.snapshot().len(), 2);

        let effective = CoreConfig::for_tenant(coordinator.registry(), &app.as_public_tenant()).unwrap();
        assert_eq!(effective.access_token_validity_millis(), 600_000);
        coordinator.key_manager().signing_keys(&app).unwrap();
        assert_eq!(coordinator.cronjobs().tenants_info().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_config_is_logged_and_snapshot_advances() {
        let (coordinator, storage) = coordinator();
        storage.create_tenant(&TenantConfig::new(TenantIdentifier::BASE)).await.unwrap();
        coordinator.refresh().await;

        let tenant = TenantIdentifier::new(None, Some("a1"), None);
        storage
            .create_tenant(&config(tenant.clone(), json!({"access_token_validity": "0s"})))
            .await
            .unwrap();
        coordinator.refresh().await;

        assert_eq!(coordinator.reload_count(), 2);
        assert!(coordinator.get_tenant_info(&tenant).is_some());
        assert!(coordinator.key_manager().signing_keys(&tenant.to_app_identifier()).is_err());

        // The bad config is not retried on every refresh.
        coordinator.refresh().await;
        assert_eq!(coordinator.reload_count(), 2);
    }

    #[tokio::test]
    async fn test_reads_filter_snapshot() {
        let (coordinator, storage) = coordinator();
        for tenant in [
            TenantIdentifier::BASE,
            TenantIdentifier::new(None, Some("a1"), None),
            TenantIdentifier::new(None, Some("a1"), Some("t1")),
            TenantIdentifier::new(Some("d1"), None, None),
            TenantIdentifier::new(Some("d1"), Some("a2"), None),
        ] {
            storage.create_tenant(&TenantConfig::new(tenant)).await.unwrap();
        }

        let app = AppIdentifier::new(None, Some("a1"));
        assert_eq!(coordinator.get_all_tenants_for_app(&app).await.len(), 2);
        assert_eq!(
            coordinator.get_all_apps_and_tenants_for_connection_uri_domain(Some("D1")).await.len(),
            2
        );
        assert_eq!(coordinator.get_all_apps_and_tenants_for_connection_uri_domain(None).await.len(), 3);
        assert_eq!(coordinator.get_all_tenants().await.len(), 5);
    }
}

//! End-to-end checks of registry fallback, exactly-once installation, key
//! rotation self-healing, token versions, protected claims, config
//! inheritance, refresh idempotence and default-scope deletion.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sessionkit_core::{
    AccessTokenCodec, CoreConfig, DefaultScope, Multitenancy, NewAccessToken, ScopedResource,
    SharedStorageProvider, TenantConfigCoordinator, TenantResourceRegistry, TokenVersion,
    assert_auth_error, assert_tenancy_error, signing_keys::keypair,
    testutil::in_memory_multitenancy,
};
use sessionkit_storage::{
    AppIdentifier, KeyStorage, KeyValueInfo, KvMultitenancyStorage, MemoryBackend,
    MultitenancyStorage, OptimisticKeyStorage, StorageResult, TenantConfig, TenantIdentifier,
    keys::KvOptimisticKeyStorage,
};
use tokio::sync::Barrier;

#[derive(Debug)]
struct Marker(&'static str);

impl ScopedResource for Marker {
    const RESOURCE_NAME: &'static str = "marker";
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

async fn with_app(config: CoreConfig) -> (MemoryBackend, Multitenancy, TenantIdentifier) {
    let (backend, multitenancy) = in_memory_multitenancy(config).await;
    let app = TenantIdentifier::new(None, Some("a1"), None);
    multitenancy
        .add_new_or_update_app_or_tenant(&TenantIdentifier::BASE, TenantConfig::new(app.clone()))
        .await
        .expect("create app");
    (backend, multitenancy, app)
}

fn new_token(version: TokenVersion) -> NewAccessToken {
    NewAccessToken::builder()
        .session_handle("session-1")
        .user_id("user-1")
        .refresh_token_hash1("hash-1")
        .anti_csrf_token("csrf-1")
        .user_data(json!({"role": "admin"}).as_object().cloned().unwrap())
        .version(version)
        .build()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn registry_falls_back_in_order() {
    let registry = TenantResourceRegistry::new();
    let exact = TenantIdentifier::new(Some("d1"), Some("a1"), Some("t1"));
    let app_in_domain = TenantIdentifier::new(Some("d1"), Some("a1"), None);
    let tenant_any_domain = TenantIdentifier::new(None, Some("a1"), Some("t1"));

    registry.set(exact.clone(), Arc::new(Marker("A")));
    registry.set(app_in_domain.clone(), Arc::new(Marker("B")));
    registry.set(tenant_any_domain.clone(), Arc::new(Marker("C")));
    registry.set(TenantIdentifier::BASE, Arc::new(Marker("D")));

    assert_eq!(registry.get::<Marker>(&exact).unwrap().0, "A");
    registry.remove::<Marker>(&exact);
    assert_eq!(registry.get::<Marker>(&exact).unwrap().0, "B");
    registry.remove::<Marker>(&app_in_domain);
    assert_eq!(registry.get::<Marker>(&exact).unwrap().0, "C");
    registry.remove::<Marker>(&tenant_any_domain);
    assert_eq!(registry.get::<Marker>(&exact).unwrap().0, "D");

    // An entry for a different tenant never matches.
    registry.remove::<Marker>(&TenantIdentifier::BASE);
    registry.set(TenantIdentifier::new(None, Some("a1"), Some("t2")), Arc::new(Marker("other")));
    assert!(registry.get::<Marker>(&exact).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn set_if_absent_installs_exactly_once() {
    const CALLERS: usize = 16;
    let registry = Arc::new(TenantResourceRegistry::new());
    let barrier = Arc::new(Barrier::new(CALLERS));
    let scope = TenantIdentifier::new(None, Some("a1"), None);

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let scope = scope.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                registry.set_if_absent(scope, Arc::new(Marker("candidate")))
            })
        })
        .collect();

    let mut installed = Vec::with_capacity(CALLERS);
    for handle in handles {
        installed.push(handle.await.unwrap());
    }
    assert!(installed.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.len(), 1);
}

// ---------------------------------------------------------------------------
// Key rotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rotated_out_key_verifies_until_purged_then_one_retry() {
    let config = CoreConfig::builder()
        .access_token_dynamic_signing_key_update_interval(Duration::from_secs(60))
        .build()
        .unwrap();
    let (backend, multitenancy, tenant) = with_app(config).await;
    let app = tenant.to_app_identifier();
    let raw = KvOptimisticKeyStorage::new(backend);

    let k1_created = now_millis() - 10_000;
    raw.add_access_token_signing_key_if_unchanged(
        &app,
        KeyValueInfo::new(keypair::generate_key_string().unwrap(), k1_created),
        None,
    )
    .await
    .unwrap();

    let codec = AccessTokenCodec::builder()
        .registry(Arc::clone(multitenancy.coordinator().registry()))
        .build();
    let issued = codec.create_new_access_token(&tenant, new_token(TokenVersion::V3)).await.unwrap();

    // Another process rotates to K2; K1 stays fetchable.
    raw.add_access_token_signing_key_if_unchanged(
        &app,
        KeyValueInfo::new(keypair::generate_key_string().unwrap(), now_millis()),
        Some(k1_created),
    )
    .await
    .unwrap();
    codec.key_manager().invalidate_cache(&app);

    let outcome = codec.get_info_from_access_token(&tenant, &issued.token, true).await;
    assert_eq!(outcome.verified().unwrap().claims.user_id, "user-1");
    assert_eq!(codec.retry_count(), 0);

    // K1 purged everywhere.
    raw.remove_access_token_signing_keys_before(&app, k1_created + 1).await.unwrap();
    codec.key_manager().invalidate_cache(&app);

    let outcome = codec.get_info_from_access_token(&tenant, &issued.token, true).await;
    assert!(outcome.is_must_refresh());
    assert_eq!(codec.retry_count(), 1);
}

// ---------------------------------------------------------------------------
// Token versions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_version_round_trips() {
    let (_, multitenancy, tenant) = with_app(CoreConfig::default()).await;
    let codec = AccessTokenCodec::builder()
        .registry(Arc::clone(multitenancy.coordinator().registry()))
        .build();
    let expiry = now_millis() + 3_600_500;

    for version in [TokenVersion::V1, TokenVersion::V2, TokenVersion::V3] {
        let mut request = new_token(version);
        request.expiry_time = Some(expiry);
        let issued = codec.create_new_access_token(&tenant, request).await.unwrap();

        let info = codec
            .get_info_from_access_token(&tenant, &issued.token, true)
            .await
            .verified()
            .unwrap_or_else(|| panic!("{version} token did not verify"));
        assert_eq!(info.version, version);
        assert_eq!(info.claims.session_handle, "session-1");
        assert_eq!(info.claims.anti_csrf_token.as_deref(), Some("csrf-1"));
        assert_eq!(info.claims.user_data["role"], "admin");

        if version == TokenVersion::V3 {
            assert_eq!(info.claims.expiry_time, expiry - expiry.rem_euclid(1000));
            assert_eq!(
                info.claims.time_created,
                issued.created_time - issued.created_time.rem_euclid(1000)
            );
        } else {
            assert_eq!(info.claims.expiry_time, expiry);
            assert_eq!(info.claims.time_created, issued.created_time);
        }
    }
    assert_eq!(codec.retry_count(), 0);
}

#[tokio::test]
async fn protected_claim_in_user_data_is_rejected() {
    let (_, multitenancy, tenant) = with_app(CoreConfig::default()).await;
    let codec = AccessTokenCodec::builder()
        .registry(Arc::clone(multitenancy.coordinator().registry()))
        .build();

    let mut request = new_token(TokenVersion::V3);
    request.user_data.insert("sessionHandle".into(), json!("forged"));
    assert_auth_error!(
        codec.create_new_access_token(&tenant, request).await,
        ProtectedClaim(_)
    );
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tenant_without_overrides_issues_with_app_validity() {
    let (_, multitenancy) = in_memory_multitenancy(CoreConfig::default()).await;
    let app = TenantIdentifier::new(None, Some("a1"), None);
    let tenant = TenantIdentifier::new(None, Some("a1"), Some("t1"));
    let mut app_overrides = serde_json::Map::new();
    app_overrides.insert("access_token_validity".into(), json!("30m"));
    multitenancy
        .add_new_or_update_app_or_tenant(
            &TenantIdentifier::BASE,
            TenantConfig::with_core_config(app.clone(), app_overrides),
        )
        .await
        .unwrap();
    multitenancy
        .add_new_or_update_app_or_tenant(&app, TenantConfig::new(tenant.clone()))
        .await
        .unwrap();

    let codec = AccessTokenCodec::builder()
        .registry(Arc::clone(multitenancy.coordinator().registry()))
        .build();
    let issued = codec.create_new_access_token(&tenant, new_token(TokenVersion::V2)).await.unwrap();
    assert_eq!(issued.expiry - issued.created_time, 30 * 60 * 1000);

    // A tenant id the app never created is rejected both ways.
    let unknown = TenantIdentifier::new(None, Some("a1"), Some("t9"));
    assert_auth_error!(
        codec.create_new_access_token(&unknown, new_token(TokenVersion::V3)).await,
        TenantOrAppNotFound(_)
    );
    let outcome = codec.get_info_from_access_token(&unknown, &issued.token, false).await;
    assert!(matches!(outcome, sessionkit_core::VerifyOutcome::HardError(_)), "got: {outcome:?}");
}

#[tokio::test]
async fn refresh_without_changes_reloads_nothing() {
    let (_, multitenancy, _) = with_app(CoreConfig::default()).await;
    let coordinator = multitenancy.coordinator();

    coordinator.refresh().await;
    let reloads = coordinator.reload_count();
    let before = coordinator.snapshot();

    assert!(coordinator.refresh().await.is_empty());
    assert_eq!(coordinator.reload_count(), reloads);
    let after = coordinator.snapshot();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before, after);
}

/// Counts every storage call reaching the wrapped tenant storage.
struct CountingTenantStorage {
    inner: KvMultitenancyStorage<MemoryBackend>,
    deletes: AtomicUsize,
}

#[async_trait]
impl MultitenancyStorage for CountingTenantStorage {
    async fn get_all_tenants(&self) -> StorageResult<Vec<TenantConfig>> {
        self.inner.get_all_tenants().await
    }

    async fn create_tenant(&self, config: &TenantConfig) -> StorageResult<()> {
        self.inner.create_tenant(config).await
    }

    async fn overwrite_tenant_config(&self, config: &TenantConfig) -> StorageResult<()> {
        self.inner.overwrite_tenant_config(config).await
    }

    async fn delete_tenant_info(&self, tenant: &TenantIdentifier) -> StorageResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_tenant_info(tenant).await
    }

    async fn delete_app_info(&self, app: &AppIdentifier) -> StorageResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_app_info(app).await
    }

    async fn delete_connection_uri_domain_info(
        &self,
        connection_uri_domain: &str,
    ) -> StorageResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_connection_uri_domain_info(connection_uri_domain).await
    }
}

#[tokio::test]
async fn deleting_defaults_never_reaches_storage() {
    let backend = MemoryBackend::new();
    let storage = Arc::new(CountingTenantStorage {
        inner: KvMultitenancyStorage::new(backend.clone()),
        deletes: AtomicUsize::new(0),
    });
    let coordinator = TenantConfigCoordinator::builder()
        .registry(Arc::new(TenantResourceRegistry::new()))
        .tenant_storage(Arc::clone(&storage) as Arc<dyn MultitenancyStorage>)
        .storage_provider(Arc::new(SharedStorageProvider::new(KeyStorage::optimistic(backend))))
        .build();
    let multitenancy = Multitenancy::new(Arc::new(coordinator));
    multitenancy.init().await.unwrap();

    for tenant in [TenantIdentifier::BASE, TenantIdentifier::new(Some("d1"), Some("a1"), None)] {
        assert_tenancy_error!(
            multitenancy.delete_tenant(&tenant).await,
            CannotDeleteDefault { kind: DefaultScope::Tenant }
        );
    }
    for app in [AppIdentifier::new(None, None), AppIdentifier::new(Some("d1"), Some("public"))] {
        assert_tenancy_error!(
            multitenancy.delete_app(&app).await,
            CannotDeleteDefault { kind: DefaultScope::App }
        );
    }
    assert_tenancy_error!(
        multitenancy.delete_connection_uri_domain("").await,
        CannotDeleteDefault { kind: DefaultScope::ConnectionUriDomain }
    );

    assert_eq!(storage.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(storage.get_all_tenants().await.unwrap().len(), 1);
}

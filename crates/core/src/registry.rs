//! Tenant-scoped resource registry.
//!
//! Every per-tenant singleton in the process (effective configs, storage
//! bindings, key managers) lives in one [`TenantResourceRegistry`], keyed by
//! the tenant scope and the resource kind. Lookups fall back from the exact
//! scope to broader ones so that a tenant inherits app-, domain- and
//! process-wide resources it has no copy of:
//!
//! 1. exact `(domain, app, tenant)`
//! 2. ignoring the tenant: `(domain, app, public)`
//! 3. ignoring the domain: `(default, app, tenant)`
//! 4. global default: `(default, public, public)`
//!
//! The map is guarded by a single [`parking_lot::Mutex`] held only for map
//! manipulation. The coordinator additionally serialises refreshes and tenant
//! mutations through [`TenantResourceRegistry::lock_for_refresh`], an async
//! lock that may be held across storage calls.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use sessionkit_storage::TenantIdentifier;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// A resource kind that can be stored in the registry.
pub trait ScopedResource: Any + Send + Sync {
    /// Name identifying this kind of resource in a [`ScopeKey`].
    const RESOURCE_NAME: &'static str;
}

/// Registry lookup key: a tenant scope plus a resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    tenant: TenantIdentifier,
    resource_name: &'static str,
}

impl ScopeKey {
    /// Creates a key.
    pub fn new(tenant: TenantIdentifier, resource_name: &'static str) -> Self {
        Self { tenant, resource_name }
    }

    /// The tenant scope.
    #[must_use]
    pub fn tenant(&self) -> &TenantIdentifier {
        &self.tenant
    }

    /// The resource kind.
    #[must_use]
    pub fn resource_name(&self) -> &'static str {
        self.resource_name
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tenant, self.resource_name)
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

fn downcast<T: ScopedResource>(entry: &Entry) -> Option<Arc<T>> {
    Arc::clone(entry).downcast::<T>().ok()
}

/// Process-wide map from [`ScopeKey`] to a long-lived resource instance.
#[derive(Default)]
pub struct TenantResourceRegistry {
    entries: Mutex<HashMap<ScopeKey, Entry>>,
    refresh_lock: AsyncMutex<()>,
}

impl TenantResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes tried by [`get`](Self::get), most specific first.
    #[must_use]
    pub fn lookup_order(tenant: &TenantIdentifier) -> [TenantIdentifier; 4] {
        [
            tenant.clone(),
            tenant.without_tenant(),
            tenant.without_domain(),
            TenantIdentifier::BASE,
        ]
    }

    /// Looks up `T` for `tenant`, falling back to broader scopes.
    pub fn get<T: ScopedResource>(&self, tenant: &TenantIdentifier) -> Option<Arc<T>> {
        let entries = self.entries.lock();
        Self::lookup_order(tenant).into_iter().find_map(|scope| {
            entries.get(&ScopeKey::new(scope, T::RESOURCE_NAME)).and_then(downcast::<T>)
        })
    }

    /// Looks up `T` bound to exactly `tenant`, without fallback.
    pub fn get_exact<T: ScopedResource>(&self, tenant: &TenantIdentifier) -> Option<Arc<T>> {
        self.entries
            .lock()
            .get(&ScopeKey::new(tenant.clone(), T::RESOURCE_NAME))
            .and_then(downcast::<T>)
    }

    /// Installs `resource` for exactly `tenant` unless an entry already
    /// exists there, in which case the existing entry is returned and
    /// `resource` is dropped.
    pub fn set_if_absent<T: ScopedResource>(&self, tenant: TenantIdentifier, resource: Arc<T>) -> Arc<T> {
        let mut entries = self.entries.lock();
        let key = ScopeKey::new(tenant, T::RESOURCE_NAME);
        if let Some(existing) = entries.get(&key).and_then(downcast::<T>) {
            return existing;
        }
        entries.insert(key, Arc::clone(&resource) as Entry);
        resource
    }

    /// Installs `resource` for exactly `tenant`, returning the entry it
    /// replaced.
    pub fn set<T: ScopedResource>(&self, tenant: TenantIdentifier, resource: Arc<T>) -> Option<Arc<T>> {
        self.entries
            .lock()
            .insert(ScopeKey::new(tenant, T::RESOURCE_NAME), resource as Entry)
            .as_ref()
            .and_then(downcast::<T>)
    }

    /// Removes the `T` bound to exactly `tenant`.
    pub fn remove<T: ScopedResource>(&self, tenant: &TenantIdentifier) -> Option<Arc<T>> {
        self.entries
            .lock()
            .remove(&ScopeKey::new(tenant.clone(), T::RESOURCE_NAME))
            .as_ref()
            .and_then(downcast::<T>)
    }

    /// Snapshot of every `T` in the registry.
    pub fn get_all_with_resource_name<T: ScopedResource>(&self) -> HashMap<TenantIdentifier, Arc<T>> {
        self.entries
            .lock()
            .iter()
            .filter(|(key, _)| key.resource_name == T::RESOURCE_NAME)
            .filter_map(|(key, entry)| downcast::<T>(entry).map(|r| (key.tenant.clone(), r)))
            .collect()
    }

    /// Atomically replaces every `T` in the registry with `resources`.
    ///
    /// Readers observe either the old set or the new one, never a partially
    /// cleared map.
    pub fn replace_all<T: ScopedResource>(
        &self,
        resources: impl IntoIterator<Item = (TenantIdentifier, Arc<T>)>,
    ) {
        let mut entries = self.entries.lock();
        entries.retain(|key, _| key.resource_name != T::RESOURCE_NAME);
        for (tenant, resource) in resources {
            entries.insert(ScopeKey::new(tenant, T::RESOURCE_NAME), resource as Entry);
        }
    }

    /// Removes every entry of the named kind across all scopes. Returns how
    /// many were removed.
    pub fn clear_by_resource_name(&self, resource_name: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.resource_name != resource_name);
        before - entries.len()
    }

    /// Removes every entry bound to exactly `tenant`, of any kind. Returns
    /// how many were removed.
    pub fn clear_by_exact_scope(&self, tenant: &TenantIdentifier) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.tenant != *tenant);
        let removed = before - entries.len();
        tracing::debug!(tenant = %tenant, removed, "Cleared registry scope");
        removed
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// `true` if the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Acquires the refresh lock that serialises config refreshes and tenant
    /// mutations. The map lock itself is not held.
    pub async fn lock_for_refresh(&self) -> AsyncMutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }
}

impl fmt::Debug for TenantResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantResourceRegistry").field("entries", &self.len()).finish()
    }
}

//! Periodic per-tenant maintenance.
//!
//! [`Cronjobs`] owns the tenant list the coordinator pushes after each reload
//! and runs every registered [`CronTask`] on its own interval in a spawned
//! task. [`Cronjobs::shutdown`] stops all of them.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sessionkit_storage::{AppIdentifier, TenantIdentifier};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::CoreConfig,
    error::Result,
    registry::TenantResourceRegistry,
    signing_keys::SigningKeyManager,
};

/// A job run periodically over every known tenant.
#[async_trait]
pub trait CronTask: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Time between runs.
    fn interval(&self) -> Duration;

    /// Runs once over `tenants`.
    async fn run(&self, tenants: &[TenantIdentifier]) -> Result<()>;
}

type TenantList = Arc<RwLock<Arc<[TenantIdentifier]>>>;

/// Runs [`CronTask`]s against the current tenant list.
pub struct Cronjobs {
    tenants: TenantList,
    cancel_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Cronjobs {
    fn default() -> Self {
        Self::new()
    }
}

impl Cronjobs {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            tenants: Arc::new(RwLock::new(Arc::from(Vec::new()))),
            cancel_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the tenant list seen by subsequent task runs.
    pub fn set_tenants_info(&self, tenants: Vec<TenantIdentifier>) {
        tracing::debug!(tenants = tenants.len(), "Updated cron tenant list");
        *self.tenants.write() = Arc::from(tenants);
    }

    /// The current tenant list.
    #[must_use]
    pub fn tenants_info(&self) -> Arc<[TenantIdentifier]> {
        Arc::clone(&self.tenants.read())
    }

    /// Schedules `task`. The first run happens after one full interval.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn add_task(&self, task: Arc<dyn CronTask>) {
        let token = self.cancel_token.child_token();
        let tenants = Arc::clone(&self.tenants);
        let interval = task.interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!(task = task.name(), "cron task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let snapshot = Arc::clone(&tenants.read());
                        if let Err(err) = task.run(&snapshot).await {
                            tracing::warn!(task = task.name(), error = %err, "cron task run failed");
                        }
                    }
                }
            }
        });

        self.handles.lock().push(handle);
    }

    /// Number of scheduled tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Stops every task and waits for them to finish.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "cron task panicked");
            }
        }
    }
}

impl std::fmt::Debug for Cronjobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cronjobs")
            .field("tenants", &self.tenants.read().len())
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// Deletes expired dynamic access token signing keys of every app whose
/// config rotates keys.
#[derive(Debug, Clone)]
pub struct CleanupExpiredSigningKeys {
    registry: Arc<TenantResourceRegistry>,
    keys: SigningKeyManager,
    interval: Duration,
}

impl CleanupExpiredSigningKeys {
    /// Default time between runs.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Creates the task over `registry`.
    pub fn new(registry: Arc<TenantResourceRegistry>, interval: Duration) -> Self {
        let keys = SigningKeyManager::new(Arc::clone(&registry));
        Self { registry, keys, interval }
    }

    /// Cleans every dynamic app among `tenants`, returning the number of keys
    /// removed. An app that fails is logged and skipped.
    pub async fn clean(&self, tenants: &[TenantIdentifier]) -> usize {
        let apps: BTreeSet<AppIdentifier> =
            tenants.iter().map(TenantIdentifier::to_app_identifier).collect();
        let mut removed = 0;

        for app in apps {
            let dynamic = match CoreConfig::for_tenant(&self.registry, &app.as_public_tenant()) {
                Ok(config) => config.is_access_token_signing_key_dynamic(),
                Err(err) => {
                    tracing::warn!(app = %app, error = %err, "Skipping key cleanup");
                    continue;
                },
            };
            if !dynamic {
                continue;
            }
            let result = match self.keys.access_token_signing_key(&app) {
                Ok(keys) => keys.clean_expired_access_token_signing_keys().await,
                Err(err) => Err(err),
            };
            match result {
                Ok(count) => removed += count,
                Err(err) => tracing::warn!(app = %app, error = %err, "Key cleanup failed"),
            }
        }
        removed
    }
}

#[async_trait]
impl CronTask for CleanupExpiredSigningKeys {
    fn name(&self) -> &'static str {
        "cleanup_expired_signing_keys"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, tenants: &[TenantIdentifier]) -> Result<()> {
        let removed = self.clean(tenants).await;
        tracing::debug!(removed, "Expired signing key cleanup complete");
        Ok(())
    }
}

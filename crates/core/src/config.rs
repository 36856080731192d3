//! Core configuration.
//!
//! [`CoreConfig`] holds the settings the key managers and the token codec
//! read per tenant. The process supplies a base config; each tenant's
//! effective config is the base with the overrides of its connection URI
//! domain, its app and finally the tenant itself merged over it
//! ([`CoreConfig::effective_for`]). Effective configs are installed in the
//! [`TenantResourceRegistry`] so scopes without an entry of their own inherit
//! a broader scope's config.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use sessionkit_storage::{TenantConfig, TenantIdentifier};

use crate::{
    error::{AuthError, ConfigError},
    registry::{ScopedResource, TenantResourceRegistry},
};

/// Default access token validity (1 hour).
pub const DEFAULT_ACCESS_TOKEN_VALIDITY: Duration = Duration::from_secs(3600);

/// Longest permitted access token validity.
pub const MAX_ACCESS_TOKEN_VALIDITY: Duration = Duration::from_secs(86_400_000);

/// Default interval between dynamic signing key rotations (1 week).
pub const DEFAULT_SIGNING_KEY_UPDATE_INTERVAL: Duration = Duration::from_secs(168 * 3600);

/// Longest permitted dynamic signing key rotation interval (30 days).
pub const MAX_SIGNING_KEY_UPDATE_INTERVAL: Duration = Duration::from_secs(720 * 3600);

/// Default refresh token validity (100 days).
pub const DEFAULT_REFRESH_TOKEN_VALIDITY: Duration = Duration::from_secs(100 * 24 * 3600);

/// Per-tenant core settings.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use sessionkit_core::CoreConfig;
///
/// let config = CoreConfig::builder()
///     .access_token_validity(Duration::from_secs(900))
///     .build()?;
/// assert_eq!(config.access_token_validity_millis(), 900_000);
/// assert!(config.is_access_token_signing_key_dynamic());
/// # Ok::<(), sessionkit_core::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// How long an access token stays valid.
    #[serde(with = "humantime_serde", default = "default_access_token_validity")]
    access_token_validity: Duration,

    /// Whether access tokens are signed with rotating keys by default.
    #[serde(default = "default_signing_key_dynamic")]
    access_token_signing_key_dynamic: bool,

    /// How often a new dynamic signing key is created.
    #[serde(with = "humantime_serde", default = "default_signing_key_update_interval")]
    access_token_dynamic_signing_key_update_interval: Duration,

    /// How long a refresh token stays valid.
    #[serde(with = "humantime_serde", default = "default_refresh_token_validity")]
    refresh_token_validity: Duration,
}

fn default_access_token_validity() -> Duration {
    DEFAULT_ACCESS_TOKEN_VALIDITY
}

fn default_signing_key_dynamic() -> bool {
    true
}

fn default_signing_key_update_interval() -> Duration {
    DEFAULT_SIGNING_KEY_UPDATE_INTERVAL
}

fn default_refresh_token_validity() -> Duration {
    DEFAULT_REFRESH_TOKEN_VALIDITY
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            access_token_validity: default_access_token_validity(),
            access_token_signing_key_dynamic: default_signing_key_dynamic(),
            access_token_dynamic_signing_key_update_interval: default_signing_key_update_interval(
            ),
            refresh_token_validity: default_refresh_token_validity(),
        }
    }
}

#[bon::bon]
impl CoreConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Optional Fields
    ///
    /// * `access_token_validity` - 1 second to 86 400 000 seconds (default: 1 hour).
    /// * `access_token_signing_key_dynamic` - (default: `true`).
    /// * `access_token_dynamic_signing_key_update_interval` - positive, at most 720 hours (default:
    ///   168 hours).
    /// * `refresh_token_validity` - must exceed the access token validity (default: 100 days).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any rule is violated.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_ACCESS_TOKEN_VALIDITY)] access_token_validity: Duration,
        #[builder(default = true)] access_token_signing_key_dynamic: bool,
        #[builder(default = DEFAULT_SIGNING_KEY_UPDATE_INTERVAL)]
        access_token_dynamic_signing_key_update_interval: Duration,
        #[builder(default = DEFAULT_REFRESH_TOKEN_VALIDITY)] refresh_token_validity: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            access_token_validity,
            access_token_signing_key_dynamic,
            access_token_dynamic_signing_key_update_interval,
            refresh_token_validity,
        };
        config.validate()?;
        Ok(config)
    }
}

impl CoreConfig {
    /// Checks every field against its permitted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_validity < Duration::from_secs(1)
            || self.access_token_validity > MAX_ACCESS_TOKEN_VALIDITY
        {
            return Err(ConfigError::invalid_value(
                "access_token_validity",
                "must be between 1 second and 86400000 seconds",
            ));
        }
        if self.access_token_dynamic_signing_key_update_interval.is_zero()
            || self.access_token_dynamic_signing_key_update_interval
                > MAX_SIGNING_KEY_UPDATE_INTERVAL
        {
            return Err(ConfigError::invalid_value(
                "access_token_dynamic_signing_key_update_interval",
                "must be positive and at most 720 hours",
            ));
        }
        if self.refresh_token_validity <= self.access_token_validity {
            return Err(ConfigError::invalid_value(
                "refresh_token_validity",
                "must be greater than access_token_validity",
            ));
        }
        Ok(())
    }

    /// This config with `overrides` merged over it.
    ///
    /// Override keys are config field names; durations use humantime syntax
    /// (`"30m"`, `"2h"`). Unknown keys are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if the merged object does not
    /// parse, or [`ConfigError::InvalidValue`] if it parses but fails
    /// validation.
    pub fn merged_with(
        &self,
        overrides: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ConfigError> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let mut merged = serde_json::to_value(self)
            .map_err(|e| ConfigError::invalid_override("failed to serialize base config", e))?;
        if let serde_json::Value::Object(fields) = &mut merged {
            fields.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let config: Self = serde_json::from_value(merged)
            .map_err(|e| ConfigError::invalid_override(e.to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// The effective config of `tenant` given every stored tenant config:
    /// `self` with the overrides of the tenant's connection URI domain, its
    /// app and the tenant itself merged over it, narrower scopes winning.
    ///
    /// # Errors
    ///
    /// Same as [`merged_with`](Self::merged_with).
    pub fn effective_for(
        &self,
        tenants: &[TenantConfig],
        tenant: &TenantIdentifier,
    ) -> Result<Self, ConfigError> {
        self.merged_with(&layered_overrides(tenants, tenant))
    }

    /// Access token validity.
    #[must_use]
    pub fn access_token_validity(&self) -> Duration {
        self.access_token_validity
    }

    /// Access token validity in milliseconds.
    #[must_use]
    pub fn access_token_validity_millis(&self) -> i64 {
        duration_millis(self.access_token_validity)
    }

    /// Whether tokens are signed with rotating keys unless the caller asks for
    /// a static key.
    #[must_use]
    pub fn is_access_token_signing_key_dynamic(&self) -> bool {
        self.access_token_signing_key_dynamic
    }

    /// Dynamic signing key rotation interval.
    #[must_use]
    pub fn access_token_dynamic_signing_key_update_interval(&self) -> Duration {
        self.access_token_dynamic_signing_key_update_interval
    }

    /// Dynamic signing key rotation interval in milliseconds.
    #[must_use]
    pub fn access_token_dynamic_signing_key_update_interval_millis(&self) -> i64 {
        duration_millis(self.access_token_dynamic_signing_key_update_interval)
    }

    /// Refresh token validity.
    #[must_use]
    pub fn refresh_token_validity(&self) -> Duration {
        self.refresh_token_validity
    }

    /// Builds the effective config of every tenant and installs them in the
    /// registry, replacing the previous set.
    ///
    /// An instance whose effective config is unchanged is kept, so holders of
    /// the old `Arc` keep observing the current value. The base scope always
    /// receives `base`.
    ///
    /// # Errors
    ///
    /// Returns the first tenant's validation error. Nothing is installed in
    /// that case.
    pub fn load_for_all_tenants(
        registry: &TenantResourceRegistry,
        base: &CoreConfig,
        tenants: &[TenantConfig],
    ) -> Result<(), ConfigError> {
        let existing = registry.get_all_with_resource_name::<CoreConfig>();
        let mut loaded: HashMap<TenantIdentifier, Arc<CoreConfig>> = HashMap::new();

        let base_entry = (TenantIdentifier::BASE, base.clone());
        let tenant_entries = tenants
            .iter()
            .filter(|t| !t.tenant_identifier.is_base())
            .map(|t| {
                base.effective_for(tenants, &t.tenant_identifier)
                    .map(|c| (t.tenant_identifier.clone(), c))
            });

        for entry in std::iter::once(Ok(base_entry)).chain(tenant_entries) {
            let (tenant, config) = entry?;
            let resource = match existing.get(&tenant) {
                Some(current) if **current == config => Arc::clone(current),
                _ => Arc::new(config),
            };
            loaded.insert(tenant, resource);
        }

        tracing::debug!(tenants = loaded.len(), "Loaded tenant configs");
        registry.replace_all(loaded);
        Ok(())
    }

    /// The effective config of `tenant`, with registry fallback.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`] if no config is installed for
    /// the tenant or any broader scope.
    pub fn for_tenant(
        registry: &TenantResourceRegistry,
        tenant: &TenantIdentifier,
    ) -> Result<Arc<CoreConfig>, AuthError> {
        registry.get::<CoreConfig>(tenant).ok_or_else(|| AuthError::tenant_or_app_not_found(tenant))
    }

    /// The config installed for exactly `tenant`, without fallback. Only
    /// tenants present at the last reload have one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TenantOrAppNotFound`] for an unknown tenant.
    pub fn for_known_tenant(
        registry: &TenantResourceRegistry,
        tenant: &TenantIdentifier,
    ) -> Result<Arc<CoreConfig>, AuthError> {
        registry
            .get_exact::<CoreConfig>(tenant)
            .ok_or_else(|| AuthError::tenant_or_app_not_found(tenant))
    }
}

/// Scopes whose overrides apply to `tenant`, broadest first: the public
/// tenant of its connection URI domain, the public tenant of its app, then
/// `tenant` itself. The base scope is never part of the chain.
pub(crate) fn override_chain(tenant: &TenantIdentifier) -> Vec<TenantIdentifier> {
    let mut chain = vec![
        TenantIdentifier::new(Some(tenant.connection_uri_domain()), None, None),
        tenant.without_tenant(),
        tenant.clone(),
    ];
    chain.dedup();
    chain.retain(|scope| !scope.is_base());
    chain
}

/// The overrides in effect for `tenant` among `tenants`, narrower scopes
/// winning.
pub(crate) fn layered_overrides(
    tenants: &[TenantConfig],
    tenant: &TenantIdentifier,
) -> serde_json::Map<String, serde_json::Value> {
    let mut merged = serde_json::Map::new();
    for scope in override_chain(tenant) {
        if let Some(config) = tenants.iter().find(|t| t.tenant_identifier == scope) {
            merged.extend(config.core_config.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    merged
}

impl ScopedResource for CoreConfig {
    const RESOURCE_NAME: &'static str = "core_config";
}

pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

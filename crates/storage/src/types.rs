//! Common types used across storage operations.
//!
//! Besides [`KeyValue`], this module defines the scope identifiers every
//! tenant-scoped record is keyed by: [`TenantIdentifier`] and
//! [`AppIdentifier`].
//!
//! # Normalization
//!
//! Each component of an identifier is normalized on construction: an absent
//! value, the empty string, and (for app and tenant) the literal `"public"`
//! all become the empty string, which denotes the default. Two identifiers
//! compare equal iff their normalized components match.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Key-value pair returned from range queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Name rendered for a default component.
pub const PUBLIC: &str = "public";

fn normalize_domain(value: Option<&str>) -> String {
    match value {
        None => String::new(),
        Some(v) => v.trim().to_ascii_lowercase(),
    }
}

fn normalize_name(value: Option<&str>) -> String {
    match value {
        None => String::new(),
        Some(v) if v == PUBLIC => String::new(),
        Some(v) => v.to_owned(),
    }
}

fn display_component(value: &str) -> &str {
    if value.is_empty() { PUBLIC } else { value }
}

/// Identifies a tenant: `(connection_uri_domain, app_id, tenant_id)`.
///
/// # Examples
///
/// ```
/// use sessionkit_storage::TenantIdentifier;
///
/// let explicit = TenantIdentifier::new(None, Some("public"), Some(""));
/// assert_eq!(explicit, TenantIdentifier::BASE);
/// assert!(explicit.is_base());
/// assert_eq!(explicit.to_string(), "public/public/public");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawTenantIdentifier")]
#[serde(rename_all = "camelCase")]
pub struct TenantIdentifier {
    connection_uri_domain: String,
    app_id: String,
    tenant_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTenantIdentifier {
    #[serde(default)]
    connection_uri_domain: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
}

impl From<RawTenantIdentifier> for TenantIdentifier {
    fn from(raw: RawTenantIdentifier) -> Self {
        Self::new(
            raw.connection_uri_domain.as_deref(),
            raw.app_id.as_deref(),
            raw.tenant_id.as_deref(),
        )
    }
}

impl TenantIdentifier {
    /// The base scope: default domain, default app, default tenant.
    pub const BASE: Self = Self {
        connection_uri_domain: String::new(),
        app_id: String::new(),
        tenant_id: String::new(),
    };

    /// Creates a normalized identifier.
    pub fn new(
        connection_uri_domain: Option<&str>,
        app_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Self {
        Self {
            connection_uri_domain: normalize_domain(connection_uri_domain),
            app_id: normalize_name(app_id),
            tenant_id: normalize_name(tenant_id),
        }
    }

    /// Normalized connection URI domain; empty means default.
    pub fn connection_uri_domain(&self) -> &str {
        &self.connection_uri_domain
    }

    /// Normalized app id; empty means default.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Normalized tenant id; empty means default.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// `true` for the base scope.
    pub fn is_base(&self) -> bool {
        *self == Self::BASE
    }

    /// `true` when the tenant component is the default.
    pub fn is_public_tenant(&self) -> bool {
        self.tenant_id.is_empty()
    }

    /// The app this tenant belongs to.
    pub fn to_app_identifier(&self) -> AppIdentifier {
        AppIdentifier {
            connection_uri_domain: self.connection_uri_domain.clone(),
            app_id: self.app_id.clone(),
        }
    }

    /// Same identifier with the tenant component cleared.
    pub fn without_tenant(&self) -> Self {
        Self { tenant_id: String::new(), ..self.clone() }
    }

    /// Same identifier with the domain component cleared.
    pub fn without_domain(&self) -> Self {
        Self { connection_uri_domain: String::new(), ..self.clone() }
    }
}

impl Default for TenantIdentifier {
    fn default() -> Self {
        Self::BASE
    }
}

impl fmt::Display for TenantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            display_component(&self.connection_uri_domain),
            display_component(&self.app_id),
            display_component(&self.tenant_id)
        )
    }
}

/// Identifies an app: `(connection_uri_domain, app_id)`.
///
/// Signing keys are scoped per app; every tenant of an app shares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentifier {
    connection_uri_domain: String,
    app_id: String,
}

impl AppIdentifier {
    /// Creates a normalized app identifier.
    pub fn new(connection_uri_domain: Option<&str>, app_id: Option<&str>) -> Self {
        Self {
            connection_uri_domain: normalize_domain(connection_uri_domain),
            app_id: normalize_name(app_id),
        }
    }

    /// Normalized connection URI domain; empty means default.
    pub fn connection_uri_domain(&self) -> &str {
        &self.connection_uri_domain
    }

    /// Normalized app id; empty means default.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The default tenant of this app.
    pub fn as_public_tenant(&self) -> TenantIdentifier {
        TenantIdentifier {
            connection_uri_domain: self.connection_uri_domain.clone(),
            app_id: self.app_id.clone(),
            tenant_id: String::new(),
        }
    }
}

impl fmt::Display for AppIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            display_component(&self.connection_uri_domain),
            display_component(&self.app_id)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::all_absent(None, None, None)]
    #[case::all_empty(Some(""), Some(""), Some(""))]
    #[case::public_names(None, Some("public"), Some("public"))]
    #[case::mixed(Some(""), None, Some("public"))]
    fn test_default_spellings_normalize_to_base(
        #[case] domain: Option<&str>,
        #[case] app: Option<&str>,
        #[case] tenant: Option<&str>,
    ) {
        assert_eq!(TenantIdentifier::new(domain, app, tenant), TenantIdentifier::BASE);
    }

    #[test]
    fn test_domain_is_case_insensitive() {
        let a = TenantIdentifier::new(Some("Example.COM"), Some("a1"), None);
        let b = TenantIdentifier::new(Some("example.com"), Some("a1"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tenant_names_are_case_sensitive() {
        let a = TenantIdentifier::new(None, Some("App"), Some("T1"));
        let b = TenantIdentifier::new(None, Some("app"), Some("t1"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_renders_defaults_as_public() {
        let tenant = TenantIdentifier::new(None, Some("a1"), Some("t1"));
        assert_eq!(tenant.to_string(), "public/a1/t1");
        assert_eq!(tenant.to_app_identifier().to_string(), "public/a1");
    }

    #[test]
    fn test_app_public_tenant_round_trip() {
        let tenant = TenantIdentifier::new(Some("d"), Some("a1"), Some("t1"));
        let app = tenant.to_app_identifier();
        assert_eq!(app.as_public_tenant(), tenant.without_tenant());
        assert!(app.as_public_tenant().is_public_tenant());
    }

    #[test]
    fn test_deserialize_normalizes() {
        let json = r#"{"connectionUriDomain":null,"appId":"public","tenantId":"t1"}"#;
        let tenant: TenantIdentifier = serde_json::from_str(json).unwrap();
        assert_eq!(tenant, TenantIdentifier::new(None, None, Some("t1")));

        let sparse: TenantIdentifier = serde_json::from_str("{}").unwrap();
        assert!(sparse.is_base());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_component() -> impl Strategy<Value = Option<String>> {
            prop_oneof![
                Just(None),
                Just(Some(String::new())),
                Just(Some(PUBLIC.to_owned())),
                "[a-z0-9]{1,8}".prop_map(Some),
            ]
        }

        proptest! {
            #[test]
            fn normalization_is_idempotent(
                domain in arb_component(),
                app in arb_component(),
                tenant in arb_component(),
            ) {
                let id = TenantIdentifier::new(domain.as_deref(), app.as_deref(), tenant.as_deref());
                let again = TenantIdentifier::new(
                    Some(id.connection_uri_domain()),
                    Some(id.app_id()),
                    Some(id.tenant_id()),
                );
                prop_assert_eq!(&id, &again);

                let json = serde_json::to_string(&id).unwrap();
                let parsed: TenantIdentifier = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(id, parsed);
            }
        }
    }
}

//! Key layout shared by the key-value stores in this crate.
//!
//! ```text
//! tenants/<json [domain, app, tenant]>            -> TenantConfig
//! keys/<json [domain, app]>/access-token-dynamic  -> [KeyValueInfo]
//! keys/<json [domain, app]>/refresh-token         -> StoredRefreshKey
//! keys/<json [domain, app]>/jwt-static            -> [JwtSigningKeyInfo]
//! ```
//!
//! Components are JSON-encoded so that no separator character needs escaping.

use crate::types::{AppIdentifier, TenantIdentifier};

pub(crate) const TENANTS_PREFIX: &str = "tenants/";
pub(crate) const KEYS_PREFIX: &str = "keys/";

pub(crate) const ACCESS_TOKEN_DYNAMIC: &str = "access-token-dynamic";
pub(crate) const REFRESH_TOKEN: &str = "refresh-token";
pub(crate) const JWT_STATIC: &str = "jwt-static";

fn encode(parts: &[&str]) -> String {
    // Serializing a slice of &str cannot fail.
    serde_json::to_string(parts).unwrap_or_default()
}

pub(crate) fn tenant_key(tenant: &TenantIdentifier) -> Vec<u8> {
    let parts = [tenant.connection_uri_domain(), tenant.app_id(), tenant.tenant_id()];
    format!("{TENANTS_PREFIX}{}", encode(&parts)).into_bytes()
}

pub(crate) fn app_prefix(app: &AppIdentifier) -> Vec<u8> {
    format!("{KEYS_PREFIX}{}/", encode(&[app.connection_uri_domain(), app.app_id()])).into_bytes()
}

pub(crate) fn app_key(app: &AppIdentifier, kind: &str) -> Vec<u8> {
    let mut key = app_prefix(app);
    key.extend_from_slice(kind.as_bytes());
    key
}

/// Exclusive upper bound for a prefix scan.
pub(crate) fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    // All 0xFF: fall back to a key that sorts after every prefixed key.
    vec![u8::MAX; prefix.len() + 1]
}

//! Scope hierarchy rules for tenant mutations.

use sessionkit_storage::TenantIdentifier;

use crate::error::{TenancyError, TenancyResult};

/// Checks that a caller acting as `source` may create or update `target`.
///
/// * A tenant is managed from its app's public tenant, or from itself.
/// * An app is managed from a public tenant of the same domain, either the
///   domain's public app or the app itself.
/// * A connection URI domain is managed from the base scope or from a scope
///   within that domain.
///
/// # Errors
///
/// Returns [`TenancyError::BadPermission`] describing the violated rule.
pub fn check_permissions_for_create_or_update(
    source: &TenantIdentifier,
    target: &TenantIdentifier,
) -> TenancyResult<()> {
    if !target.is_public_tenant() {
        if !source.is_public_tenant() && source.tenant_id() != target.tenant_id() {
            return Err(TenancyError::bad_permission(
                "You must use the public or same tenant to add/update a tenant",
            ));
        }
        if source.to_app_identifier() != target.to_app_identifier() {
            return Err(TenancyError::bad_permission(
                "You must use the same app to create/update a tenant",
            ));
        }
    } else if !target.app_id().is_empty() {
        if !source.is_public_tenant()
            || (!source.app_id().is_empty() && source.app_id() != target.app_id())
        {
            return Err(TenancyError::bad_permission(
                "You must use the public or same app to add/update an app",
            ));
        }
        if source.connection_uri_domain() != target.connection_uri_domain() {
            return Err(TenancyError::bad_permission(
                "You must use the same connection URI domain to create/update an app",
            ));
        }
    } else if !target.connection_uri_domain().is_empty()
        && !source.is_base()
        && source.connection_uri_domain() != target.connection_uri_domain()
    {
        return Err(TenancyError::bad_permission(
            "You must use the default or same connectionUriDomain to create/update a \
             connectionUriDomain",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn id(domain: Option<&str>, app: Option<&str>, tenant: Option<&str>) -> TenantIdentifier {
        TenantIdentifier::new(domain, app, tenant)
    }

    #[rstest]
    #[case::tenant_from_public_tenant(id(None, Some("a1"), None), id(None, Some("a1"), Some("t1")))]
    #[case::tenant_from_itself(id(None, Some("a1"), Some("t1")), id(None, Some("a1"), Some("t1")))]
    #[case::app_from_base(TenantIdentifier::BASE, id(None, Some("a1"), None))]
    #[case::app_from_itself(id(None, Some("a1"), None), id(None, Some("a1"), None))]
    #[case::app_from_domain_public_app(id(Some("d1"), None, None), id(Some("d1"), Some("a1"), None))]
    #[case::domain_from_base(TenantIdentifier::BASE, id(Some("d1"), None, None))]
    #[case::domain_from_itself(id(Some("d1"), None, None), id(Some("d1"), None, None))]
    #[case::base_from_base(TenantIdentifier::BASE, TenantIdentifier::BASE)]
    fn test_allowed(#[case] source: TenantIdentifier, #[case] target: TenantIdentifier) {
        check_permissions_for_create_or_update(&source, &target).unwrap();
    }

    #[rstest]
    #[case::tenant_from_sibling(id(None, Some("a1"), Some("t2")), id(None, Some("a1"), Some("t1")))]
    #[case::tenant_from_other_app(id(None, Some("a2"), None), id(None, Some("a1"), Some("t1")))]
    #[case::tenant_from_base(TenantIdentifier::BASE, id(None, Some("a1"), Some("t1")))]
    #[case::app_from_tenant(id(None, None, Some("t1")), id(None, Some("a1"), None))]
    #[case::app_from_sibling_app(id(None, Some("a2"), None), id(None, Some("a1"), None))]
    #[case::app_from_other_domain(id(Some("d2"), None, None), id(Some("d1"), Some("a1"), None))]
    #[case::domain_from_other_domain(id(Some("d2"), None, None), id(Some("d1"), None, None))]
    fn test_rejected(#[case] source: TenantIdentifier, #[case] target: TenantIdentifier) {
        let err = check_permissions_for_create_or_update(&source, &target).unwrap_err();
        assert!(matches!(err, TenancyError::BadPermission(_)), "{err:?}");
    }
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{PermissionCatalog, TokenSet, roles};

/// Authenticated actor as loaded by the caller for one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default = "default_role")]
    pub role: String,
    /// Explicit grants layered on top of the role. Absent means none.
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_role() -> String {
    roles::DEFAULT.to_string()
}

impl Default for Identity {
    fn default() -> Self {
        Self::new(roles::DEFAULT)
    }
}

impl Identity {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            permissions: Vec::new(),
        }
    }

    pub fn with_permission(mut self, token: impl Into<String>) -> Self {
        self.permissions.push(token.into());
        self
    }
}

/// Outcome of a single access check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// No identity was supplied.
    Unauthenticated,
    /// Identity present but lacks the token.
    Forbidden,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
}

/// Stateless access checks over a shared, immutable catalog.
#[derive(Clone, Debug)]
pub struct PolicyEngine {
    catalog: Arc<PermissionCatalog>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(Arc::new(PermissionCatalog::standard()))
    }
}

impl PolicyEngine {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    /// Union of the identity's explicit grants and its role's tokens.
    pub fn effective_permissions(&self, identity: &Identity) -> TokenSet {
        let mut effective = self.catalog.tokens_for_role(&identity.role).clone();
        effective.extend(identity.permissions.iter().cloned());
        effective
    }

    pub fn decide(&self, identity: Option<&Identity>, required: &str) -> Decision {
        debug_assert!(
            self.catalog.is_known_token(required),
            "access check against token {required:?} outside the permission catalog"
        );
        let Some(identity) = identity else {
            return Decision::Unauthenticated;
        };
        // membership in explicit ∪ role, without materializing the union
        let granted = identity.permissions.iter().any(|p| p == required)
            || self.catalog.tokens_for_role(&identity.role).contains(required);
        if granted {
            Decision::Allow
        } else {
            Decision::Forbidden
        }
    }

    pub fn is_allowed(&self, identity: Option<&Identity>, required: &str) -> bool {
        self.decide(identity, required).is_allowed()
    }

    pub fn check(&self, identity: Option<&Identity>, required: &str) -> Result<(), AuthzError> {
        match self.decide(identity, required) {
            Decision::Allow => Ok(()),
            Decision::Unauthenticated => Err(AuthzError::Unauthenticated),
            Decision::Forbidden => Err(AuthzError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RoleGrant, tokens};
    use proptest::prelude::*;

    fn engine() -> PolicyEngine {
        PolicyEngine::default()
    }

    #[test]
    fn missing_identity_is_denied_for_every_token() {
        let engine = engine();
        for token in engine.catalog().vocabulary() {
            assert!(!engine.is_allowed(None, token));
            assert_eq!(engine.decide(None, token), Decision::Unauthenticated);
        }
    }

    #[test]
    fn admin_reaches_every_department() {
        let engine = engine();
        let admin = Identity::new(roles::ADMIN);
        assert!(engine.is_allowed(Some(&admin), tokens::MANAGE_FINANCIALS));
        assert!(engine.is_allowed(Some(&admin), tokens::VIEW_HR));
        assert!(engine.is_allowed(Some(&admin), tokens::EDIT_LOGISTICS));
    }

    #[test]
    fn customer_has_no_back_office_access() {
        let engine = engine();
        let customer = Identity::new(roles::CUSTOMER);
        assert!(!engine.is_allowed(Some(&customer), tokens::VIEW_CORE));
        assert_eq!(
            engine.decide(Some(&customer), tokens::VIEW_CORE),
            Decision::Forbidden
        );
    }

    #[test]
    fn explicit_grant_adds_capability() {
        let engine = engine();
        let customer = Identity::new(roles::CUSTOMER).with_permission(tokens::VIEW_CORE);
        assert!(engine.is_allowed(Some(&customer), tokens::VIEW_CORE));
        assert!(!engine.is_allowed(Some(&customer), tokens::EDIT_CORE));
    }

    #[test]
    fn unknown_role_fails_closed() {
        let engine = engine();
        let stranger = Identity::new("unknown_role_xyz");
        assert!(!engine.is_allowed(Some(&stranger), tokens::VIEW_HR));

        let granted = stranger.with_permission(tokens::VIEW_HR);
        assert!(engine.is_allowed(Some(&granted), tokens::VIEW_HR));
        assert!(!engine.is_allowed(Some(&granted), tokens::EDIT_HR));
    }

    #[test]
    fn department_manager_stays_in_department() {
        let engine = engine();
        let hr = Identity::new(roles::HR_MANAGER);
        assert!(engine.is_allowed(Some(&hr), tokens::MANAGE_HR));
        assert!(!engine.is_allowed(Some(&hr), tokens::VIEW_FINANCIALS));
    }

    #[test]
    fn check_maps_deny_kinds() {
        let engine = engine();
        assert_eq!(
            engine.check(None, tokens::VIEW_ADMIN),
            Err(AuthzError::Unauthenticated)
        );
        assert_eq!(
            engine.check(Some(&Identity::new(roles::AGENT)), tokens::VIEW_ADMIN),
            Err(AuthzError::Forbidden)
        );
        assert_eq!(
            engine.check(Some(&Identity::new(roles::ADMIN_STAFF)), tokens::VIEW_ADMIN),
            Ok(())
        );
    }

    #[test]
    fn effective_permissions_is_union() {
        let engine = engine();
        let identity = Identity::new(roles::CORE_STAFF)
            .with_permission(tokens::VIEW_HR)
            .with_permission(tokens::VIEW_CORE);
        let effective = engine.effective_permissions(&identity);
        assert_eq!(effective.len(), 4);
        assert!(effective.contains(tokens::VIEW_HR));
        assert!(effective.contains(tokens::MANAGE_CORE));
    }

    #[test]
    fn absent_permissions_deserialize_as_empty() {
        let identity: Identity = serde_json::from_str(r#"{ "role": "customer" }"#).unwrap();
        assert!(identity.permissions.is_empty());
        let identity: Identity = serde_json::from_str("{}").unwrap();
        assert_eq!(identity.role, roles::CUSTOMER);
    }

    #[test]
    fn custom_catalog_is_injected() {
        let catalog = PermissionCatalog::builder()
            .department("Financials", "financials")
            .role("auditor", RoleGrant::Explicit(vec![tokens::VIEW_FINANCIALS.into()]))
            .build()
            .unwrap();
        let engine = PolicyEngine::new(Arc::new(catalog));
        let auditor = Identity::new("auditor");
        assert!(engine.is_allowed(Some(&auditor), tokens::VIEW_FINANCIALS));
        assert!(!engine.is_allowed(Some(&auditor), tokens::EDIT_FINANCIALS));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside the permission catalog")]
    fn unknown_required_token_is_a_programming_error() {
        engine().is_allowed(Some(&Identity::new(roles::ADMIN)), "launch_rockets");
    }

    fn role_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(roles::ADMIN.to_string()),
            Just(roles::HR_MANAGER.to_string()),
            Just(roles::FINANCE_MANAGER.to_string()),
            Just(roles::LOGISTICS_STAFF.to_string()),
            Just(roles::ADMIN_STAFF.to_string()),
            Just(roles::CORE_STAFF.to_string()),
            Just(roles::CUSTOMER.to_string()),
            Just(roles::TOUR_GUIDE.to_string()),
            Just(roles::AGENT.to_string()),
            "[a-z_]{1,12}",
        ]
    }

    fn token_strategy() -> impl Strategy<Value = String> {
        let vocabulary: Vec<String> = PermissionCatalog::standard()
            .vocabulary()
            .iter()
            .cloned()
            .collect();
        proptest::sample::select(vocabulary)
    }

    proptest! {
        #[test]
        fn decisions_are_idempotent(
            role in role_strategy(),
            grants in proptest::collection::vec(token_strategy(), 0..5),
            required in token_strategy(),
        ) {
            let engine = engine();
            let identity = Identity { role, permissions: grants };
            let first = engine.decide(Some(&identity), &required);
            let second = engine.decide(Some(&identity), &required);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn explicit_grants_are_monotonic(
            role in role_strategy(),
            grants in proptest::collection::vec(token_strategy(), 0..5),
            extra in token_strategy(),
            required in token_strategy(),
        ) {
            let engine = engine();
            let before = Identity { role, permissions: grants };
            let after = before.clone().with_permission(extra.clone());
            if engine.is_allowed(Some(&before), &required) {
                prop_assert!(engine.is_allowed(Some(&after), &required));
            }
            prop_assert!(engine.is_allowed(Some(&after), &extra));
        }

        #[test]
        fn decision_matches_effective_set(
            role in role_strategy(),
            grants in proptest::collection::vec(token_strategy(), 0..5),
            required in token_strategy(),
        ) {
            let engine = engine();
            let identity = Identity { role, permissions: grants };
            prop_assert_eq!(
                engine.is_allowed(Some(&identity), &required),
                engine.effective_permissions(&identity).contains(&required)
            );
        }
    }
}

//! Authorization primitives for back-office routes.
//!
//! A [`PermissionCatalog`] maps departments to their `view`/`edit`/`manage`
//! tokens and roles to bundles of those tokens. [`PolicyEngine`] answers
//! whether an [`Identity`] holds a required token. Both are pure: identities
//! are loaded by the caller and the catalog never changes after startup.

mod catalog;
mod decision;

pub use catalog::{
    Action, CatalogBuilder, CatalogDocument, CatalogError, CatalogSnapshot, MAX_SLUG_LEN,
    PermissionCatalog, RoleGrant, TokenSet, departments, roles, tokens,
};
pub use decision::{AuthzError, Decision, Identity, PolicyEngine};

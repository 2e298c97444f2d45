use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Set of permission tokens, ordered so listings are stable.
pub type TokenSet = BTreeSet<String>;

static EMPTY: TokenSet = BTreeSet::new();

/// Department keys known to the standard catalog.
pub mod departments {
    pub const HR: &str = "HR";
    pub const CORE: &str = "Core";
    pub const LOGISTICS: &str = "Logistics";
    pub const ADMINISTRATIVE: &str = "Administrative";
    pub const FINANCIALS: &str = "Financials";

    /// Department assigned to newly registered users.
    pub const DEFAULT: &str = CORE;
}

/// Role names known to the standard catalog.
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const HR_MANAGER: &str = "hr_manager";
    pub const FINANCE_MANAGER: &str = "finance_manager";
    pub const LOGISTICS_STAFF: &str = "logistics_staff";
    pub const ADMIN_STAFF: &str = "admin_staff";
    pub const CORE_STAFF: &str = "core_staff";
    pub const CUSTOMER: &str = "customer";
    pub const TOUR_GUIDE: &str = "tour_guide";
    pub const AGENT: &str = "agent";

    /// Low-privilege role assigned when none is given.
    pub const DEFAULT: &str = CUSTOMER;
}

/// Token constants for the standard catalog, used as route requirements.
pub mod tokens {
    pub const VIEW_HR: &str = "view_hr";
    pub const EDIT_HR: &str = "edit_hr";
    pub const MANAGE_HR: &str = "manage_hr";
    pub const VIEW_CORE: &str = "view_core";
    pub const EDIT_CORE: &str = "edit_core";
    pub const MANAGE_CORE: &str = "manage_core";
    pub const VIEW_LOGISTICS: &str = "view_logistics";
    pub const EDIT_LOGISTICS: &str = "edit_logistics";
    pub const MANAGE_LOGISTICS: &str = "manage_logistics";
    pub const VIEW_ADMIN: &str = "view_admin";
    pub const EDIT_ADMIN: &str = "edit_admin";
    pub const MANAGE_ADMIN: &str = "manage_admin";
    pub const VIEW_FINANCIALS: &str = "view_financials";
    pub const EDIT_FINANCIALS: &str = "edit_financials";
    pub const MANAGE_FINANCIALS: &str = "manage_financials";
}

/// CRUD-style capability level a department token grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Edit,
    Manage,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::View, Action::Edit, Action::Manage];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Edit => "edit",
            Action::Manage => "manage",
        }
    }

    /// Token for this action scoped to a department slug, e.g. `edit_hr`.
    pub fn token(self, slug: &str) -> String {
        format!("{}_{}", self.as_str(), slug)
    }
}

/// How a role derives its default tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleGrant {
    /// Union of every department in the catalog.
    All,
    /// Union of the named departments. An empty list grants nothing.
    Departments(Vec<String>),
    /// Exactly the listed tokens.
    Explicit(Vec<String>),
}

impl RoleGrant {
    pub fn none() -> Self {
        RoleGrant::Departments(Vec::new())
    }

    pub fn department(key: impl Into<String>) -> Self {
        RoleGrant::Departments(vec![key.into()])
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("department {0} is defined twice")]
    DuplicateDepartment(String),
    #[error("department {department} has an invalid slug {slug:?}")]
    InvalidSlug { department: String, slug: String },
    #[error("token {token} of department {department} is already owned by another department")]
    DuplicateToken { department: String, token: String },
    #[error("role {0} is defined twice")]
    DuplicateRole(String),
    #[error("role {role} references unknown department {department}")]
    UnknownDepartment { role: String, department: String },
    #[error("role {role} lists unknown token {token}")]
    UnknownToken { role: String, token: String },
    #[error("failed to read permission catalog {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid permission catalog document")]
    Parse(#[from] serde_json::Error),
}

/// On-disk shape of a catalog: department key to slug, role name to grant.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDocument {
    pub departments: BTreeMap<String, String>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleGrant>,
}

/// Immutable department and role lookup tables.
///
/// Lookups are total: unknown departments and roles resolve to the empty set
/// so a misspelled role never gains capability.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionCatalog {
    departments: BTreeMap<String, TokenSet>,
    roles: BTreeMap<String, TokenSet>,
    vocabulary: TokenSet,
}

impl PermissionCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The travel back-office catalog: five departments, nine roles.
    pub fn standard() -> Self {
        Self::builder()
            .department(departments::HR, "hr")
            .department(departments::CORE, "core")
            .department(departments::LOGISTICS, "logistics")
            .department(departments::ADMINISTRATIVE, "admin")
            .department(departments::FINANCIALS, "financials")
            .role(roles::ADMIN, RoleGrant::All)
            .role(roles::HR_MANAGER, RoleGrant::department(departments::HR))
            .role(
                roles::FINANCE_MANAGER,
                RoleGrant::department(departments::FINANCIALS),
            )
            .role(
                roles::LOGISTICS_STAFF,
                RoleGrant::department(departments::LOGISTICS),
            )
            .role(
                roles::ADMIN_STAFF,
                RoleGrant::department(departments::ADMINISTRATIVE),
            )
            .role(roles::CORE_STAFF, RoleGrant::department(departments::CORE))
            .role(roles::CUSTOMER, RoleGrant::none())
            .role(roles::TOUR_GUIDE, RoleGrant::none())
            .role(roles::AGENT, RoleGrant::none())
            .build()
            .expect("standard permission catalog is well formed")
    }

    pub fn from_document(doc: CatalogDocument) -> Result<Self, CatalogError> {
        let mut builder = Self::builder();
        for (key, slug) in doc.departments {
            builder = builder.department(key, slug);
        }
        for (name, grant) in doc.roles {
            builder = builder.role(name, grant);
        }
        builder.build()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_str(raw)?;
        Self::from_document(doc)
    }

    /// Load a JSON catalog document from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn tokens_for_department(&self, department: &str) -> &TokenSet {
        self.departments.get(department).unwrap_or(&EMPTY)
    }

    pub fn tokens_for_role(&self, role: &str) -> &TokenSet {
        self.roles.get(role).unwrap_or(&EMPTY)
    }

    pub fn departments(&self) -> impl Iterator<Item = &str> {
        self.departments.keys().map(String::as_str)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn is_known_department(&self, department: &str) -> bool {
        self.departments.contains_key(department)
    }

    pub fn is_known_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn is_known_token(&self, token: &str) -> bool {
        self.vocabulary.contains(token)
    }

    /// Every token owned by some department.
    pub fn vocabulary(&self) -> &TokenSet {
        &self.vocabulary
    }

    /// Resolved view of the catalog for listings and diagnostics.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            departments: self.departments.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Serializable, fully resolved copy of a catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub departments: BTreeMap<String, TokenSet>,
    pub roles: BTreeMap<String, TokenSet>,
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    departments: Vec<(String, String)>,
    roles: Vec<(String, RoleGrant)>,
}

impl CatalogBuilder {
    pub fn department(mut self, key: impl Into<String>, slug: impl Into<String>) -> Self {
        self.departments.push((key.into(), slug.into()));
        self
    }

    pub fn role(mut self, name: impl Into<String>, grant: RoleGrant) -> Self {
        self.roles.push((name.into(), grant));
        self
    }

    pub fn build(self) -> Result<PermissionCatalog, CatalogError> {
        let mut catalog = PermissionCatalog::default();

        for (key, slug) in self.departments {
            if catalog.departments.contains_key(&key) {
                return Err(CatalogError::DuplicateDepartment(key));
            }
            if !valid_slug(&slug) {
                return Err(CatalogError::InvalidSlug {
                    department: key,
                    slug,
                });
            }
            let mut owned = TokenSet::new();
            for action in Action::ALL {
                let token = action.token(&slug);
                if !catalog.vocabulary.insert(token.clone()) {
                    return Err(CatalogError::DuplicateToken {
                        department: key,
                        token,
                    });
                }
                owned.insert(token);
            }
            catalog.departments.insert(key, owned);
        }

        for (name, grant) in self.roles {
            if catalog.roles.contains_key(&name) {
                return Err(CatalogError::DuplicateRole(name));
            }
            let resolved = match grant {
                RoleGrant::All => catalog.vocabulary.clone(),
                RoleGrant::Departments(keys) => {
                    let mut set = TokenSet::new();
                    for key in keys {
                        let Some(owned) = catalog.departments.get(&key) else {
                            return Err(CatalogError::UnknownDepartment {
                                role: name,
                                department: key,
                            });
                        };
                        set.extend(owned.iter().cloned());
                    }
                    set
                }
                RoleGrant::Explicit(list) => {
                    let mut set = TokenSet::new();
                    for token in list {
                        if !catalog.vocabulary.contains(&token) {
                            return Err(CatalogError::UnknownToken { role: name, token });
                        }
                        set.insert(token);
                    }
                    set
                }
            };
            catalog.roles.insert(name, resolved);
        }

        Ok(catalog)
    }
}

/// Longest slug whose tokens still fit the 64-character grant column.
pub const MAX_SLUG_LEN: usize = 48;

fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

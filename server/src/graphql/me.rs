use async_graphql::SimpleObject;
use platform_authz::{PermissionCatalog, PolicyEngine};
use platform_db::UserRecord;

#[derive(Clone, Debug, SimpleObject)]
pub struct MePayload {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub department: String,
    /// Explicit grants only.
    pub permissions: Vec<String>,
    /// Role tokens plus explicit grants.
    pub entitlements: Vec<String>,
}

impl MePayload {
    pub fn from_record(policy: &PolicyEngine, user: UserRecord) -> Self {
        let entitlements = policy
            .effective_permissions(&user.identity())
            .into_iter()
            .collect();
        Self {
            id: user.id.to_string(),
            name: user.name,
            email: user.email,
            role: user.role,
            department: user.department,
            permissions: user.permissions,
            entitlements,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct DepartmentPayload {
    pub key: String,
    pub tokens: Vec<String>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct RolePayload {
    pub name: String,
    pub tokens: Vec<String>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct CatalogPayload {
    pub departments: Vec<DepartmentPayload>,
    pub roles: Vec<RolePayload>,
}

impl CatalogPayload {
    pub fn from_catalog(catalog: &PermissionCatalog) -> Self {
        let departments = catalog
            .departments()
            .map(|key| DepartmentPayload {
                key: key.to_string(),
                tokens: catalog.tokens_for_department(key).iter().cloned().collect(),
            })
            .collect();
        let roles = catalog
            .roles()
            .map(|name| RolePayload {
                name: name.to_string(),
                tokens: catalog.tokens_for_role(name).iter().cloned().collect(),
            })
            .collect();
        Self { departments, roles }
    }
}

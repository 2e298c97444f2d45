use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use entity::{user_group_members, user_permissions, users};
use platform_authz::{Identity, departments, roles};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    ModelTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Account lifecycle state, stored as text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Profile fields an administrator may change; absent fields are left as is.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<UserStatus>,
}

/// A user row with its explicit grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub department: String,
    pub status: String,
    pub active: bool,
    pub permissions: Vec<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl UserRecord {
    fn from_parts(model: users::Model, mut permissions: Vec<String>) -> Self {
        permissions.sort();
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            role: model.role,
            department: model.department,
            status: model.status,
            active: model.active,
            permissions,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            role: self.role.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

pub(crate) fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

fn map_unique(err: DbErr, what: &str) -> DbError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => DbError::Conflict(format!("{what} already exists")),
        _ => DbError::Db(err),
    }
}

pub(crate) async fn require_user(db: &DatabaseConnection, id: Uuid) -> DbResult<users::Model> {
    users::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(DbError::NotFound)
}

async fn permissions_of(db: &DatabaseConnection, id: Uuid) -> DbResult<Vec<String>> {
    let rows = user_permissions::Entity::find()
        .filter(user_permissions::Column::UserId.eq(id))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|row| row.permission).collect())
}

async fn record(db: &DatabaseConnection, model: users::Model) -> DbResult<UserRecord> {
    let permissions = permissions_of(db, model.id).await?;
    Ok(UserRecord::from_parts(model, permissions))
}

pub async fn create_user(db: &DatabaseConnection, input: NewUser) -> DbResult<UserRecord> {
    let stamp = now();
    let model = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(input.name),
        email: Set(input.email),
        phone: Set(input.phone),
        role: Set(input.role.unwrap_or_else(|| roles::DEFAULT.to_string())),
        department: Set(input
            .department
            .unwrap_or_else(|| departments::DEFAULT.to_string())),
        status: Set(input.status.unwrap_or(UserStatus::Pending).as_str().to_string()),
        active: Set(input.active.unwrap_or(true)),
        created_at: Set(stamp),
        updated_at: Set(stamp),
    }
    .insert(db)
    .await
    .map_err(|err| map_unique(err, "email"))?;
    tracing::info!(user_id = %model.id, role = %model.role, "user created");
    Ok(UserRecord::from_parts(model, Vec::new()))
}

/// All users, newest first.
pub async fn list_users(db: &DatabaseConnection) -> DbResult<Vec<UserRecord>> {
    let models = users::Entity::find()
        .order_by_desc(users::Column::CreatedAt)
        .all(db)
        .await?;
    let mut grants: HashMap<Uuid, Vec<String>> = HashMap::new();
    for row in user_permissions::Entity::find().all(db).await? {
        grants.entry(row.user_id).or_default().push(row.permission);
    }
    Ok(models
        .into_iter()
        .map(|model| {
            let permissions = grants.remove(&model.id).unwrap_or_default();
            UserRecord::from_parts(model, permissions)
        })
        .collect())
}

pub async fn find_user(db: &DatabaseConnection, id: Uuid) -> DbResult<Option<UserRecord>> {
    match users::Entity::find_by_id(id).one(db).await? {
        Some(model) => Ok(Some(record(db, model).await?)),
        None => Ok(None),
    }
}

pub async fn find_user_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> DbResult<Option<UserRecord>> {
    let model = users::Entity::find()
        .filter(users::Column::Email.eq(email))
        .one(db)
        .await?;
    match model {
        Some(model) => Ok(Some(record(db, model).await?)),
        None => Ok(None),
    }
}

pub async fn update_user(
    db: &DatabaseConnection,
    id: Uuid,
    patch: UserPatch,
) -> DbResult<UserRecord> {
    let mut active = require_user(db, id).await?.into_active_model();
    if let Some(name) = patch.name {
        active.name = Set(name);
    }
    if let Some(email) = patch.email {
        active.email = Set(email);
    }
    if let Some(phone) = patch.phone {
        active.phone = Set(Some(phone));
    }
    if let Some(status) = patch.status {
        active.status = Set(status.as_str().to_string());
    }
    active.updated_at = Set(now());
    let model = active
        .update(db)
        .await
        .map_err(|err| map_unique(err, "email"))?;
    record(db, model).await
}

pub async fn set_role(db: &DatabaseConnection, id: Uuid, role: &str) -> DbResult<UserRecord> {
    let mut active = require_user(db, id).await?.into_active_model();
    active.role = Set(role.to_string());
    active.updated_at = Set(now());
    let model = active.update(db).await?;
    tracing::info!(user_id = %id, role, "user role changed");
    record(db, model).await
}

pub async fn set_department(
    db: &DatabaseConnection,
    id: Uuid,
    department: &str,
) -> DbResult<UserRecord> {
    let mut active = require_user(db, id).await?.into_active_model();
    active.department = Set(department.to_string());
    active.updated_at = Set(now());
    let model = active.update(db).await?;
    tracing::info!(user_id = %id, department, "user department changed");
    record(db, model).await
}

/// Add an explicit grant. Granting a token the user already holds is a no-op.
pub async fn grant_permission(
    db: &DatabaseConnection,
    id: Uuid,
    token: &str,
) -> DbResult<UserRecord> {
    let model = require_user(db, id).await?;
    let existing = user_permissions::Entity::find_by_id((id, token.to_string()))
        .one(db)
        .await?;
    if existing.is_none() {
        user_permissions::ActiveModel {
            user_id: Set(id),
            permission: Set(token.to_string()),
        }
        .insert(db)
        .await?;
        tracing::info!(user_id = %id, permission = token, "permission granted");
    }
    record(db, model).await
}

/// Remove an explicit grant. Role-derived tokens are unaffected.
pub async fn revoke_permission(
    db: &DatabaseConnection,
    id: Uuid,
    token: &str,
) -> DbResult<UserRecord> {
    let model = require_user(db, id).await?;
    let result = user_permissions::Entity::delete_by_id((id, token.to_string()))
        .exec(db)
        .await?;
    if result.rows_affected > 0 {
        tracing::info!(user_id = %id, permission = token, "permission revoked");
    }
    record(db, model).await
}

/// Activating marks the account `active`; deactivating marks it `suspended`.
pub async fn set_active(db: &DatabaseConnection, id: Uuid, active: bool) -> DbResult<UserRecord> {
    let mut model = require_user(db, id).await?.into_active_model();
    let status = if active {
        UserStatus::Active
    } else {
        UserStatus::Suspended
    };
    model.active = Set(active);
    model.status = Set(status.as_str().to_string());
    model.updated_at = Set(now());
    let model = model.update(db).await?;
    record(db, model).await
}

/// Hard delete of the user with its explicit grants and group memberships.
pub async fn delete_user(db: &DatabaseConnection, id: Uuid) -> DbResult<()> {
    let txn = db.begin().await?;
    let Some(model) = users::Entity::find_by_id(id).one(&txn).await? else {
        return Err(DbError::NotFound);
    };
    user_permissions::Entity::delete_many()
        .filter(user_permissions::Column::UserId.eq(id))
        .exec(&txn)
        .await?;
    user_group_members::Entity::delete_many()
        .filter(user_group_members::Column::UserId.eq(id))
        .exec(&txn)
        .await?;
    model.delete(&txn).await?;
    txn.commit().await?;
    tracing::info!(user_id = %id, "user deleted");
    Ok(())
}

/// Role and grants of an active user, or `None` when the user is unknown or
/// deactivated.
pub async fn load_identity(db: &DatabaseConnection, id: Uuid) -> DbResult<Option<Identity>> {
    let Some(model) = users::Entity::find_by_id(id).one(db).await? else {
        return Ok(None);
    };
    if !model.active {
        return Ok(None);
    }
    let permissions = permissions_of(db, id).await?;
    Ok(Some(Identity {
        role: model.role,
        permissions,
    }))
}

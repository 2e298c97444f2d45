use chrono::{DateTime, FixedOffset};
use entity::{user_group_members, user_groups};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DbError, DbResult, users::now, users::require_user};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    pub id: Uuid,
    pub name: String,
    pub department: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<user_groups::Model> for GroupRecord {
    fn from(model: user_groups::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            department: model.department,
            parent_id: model.parent_id,
            created_at: model.created_at,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub group_id: Uuid,
    pub user_id: Uuid,
}

impl From<user_group_members::Model> for GroupMember {
    fn from(model: user_group_members::Model) -> Self {
        Self {
            group_id: model.group_id,
            user_id: model.user_id,
        }
    }
}

async fn require_group(db: &DatabaseConnection, id: Uuid) -> DbResult<user_groups::Model> {
    user_groups::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(DbError::NotFound)
}

/// All groups ordered by name.
pub async fn list_groups(db: &DatabaseConnection) -> DbResult<Vec<GroupRecord>> {
    let models = user_groups::Entity::find()
        .order_by_asc(user_groups::Column::Name)
        .all(db)
        .await?;
    Ok(models.into_iter().map(GroupRecord::from).collect())
}

pub async fn find_group(db: &DatabaseConnection, id: Uuid) -> DbResult<Option<GroupRecord>> {
    Ok(user_groups::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(GroupRecord::from))
}

/// Fails with [`DbError::NotFound`] when the parent group does not exist.
pub async fn create_group(db: &DatabaseConnection, input: NewGroup) -> DbResult<GroupRecord> {
    if let Some(parent) = input.parent_id {
        require_group(db, parent).await?;
    }
    let model = user_groups::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(input.name),
        department: Set(input.department),
        parent_id: Set(input.parent_id),
        created_at: Set(now()),
    }
    .insert(db)
    .await?;
    tracing::info!(group_id = %model.id, name = %model.name, "group created");
    Ok(model.into())
}

/// Removes the group and its memberships; child groups become top-level.
pub async fn delete_group(db: &DatabaseConnection, id: Uuid) -> DbResult<()> {
    let txn = db.begin().await?;
    let Some(model) = user_groups::Entity::find_by_id(id).one(&txn).await? else {
        return Err(DbError::NotFound);
    };
    user_groups::Entity::update_many()
        .col_expr(user_groups::Column::ParentId, Expr::value(Option::<Uuid>::None))
        .filter(user_groups::Column::ParentId.eq(id))
        .exec(&txn)
        .await?;
    user_group_members::Entity::delete_many()
        .filter(user_group_members::Column::GroupId.eq(id))
        .exec(&txn)
        .await?;
    model.delete(&txn).await?;
    txn.commit().await?;
    tracing::info!(group_id = %id, "group deleted");
    Ok(())
}

pub async fn list_group_members(
    db: &DatabaseConnection,
    group_id: Uuid,
) -> DbResult<Vec<GroupMember>> {
    require_group(db, group_id).await?;
    let rows = user_group_members::Entity::find()
        .filter(user_group_members::Column::GroupId.eq(group_id))
        .order_by_asc(user_group_members::Column::UserId)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(GroupMember::from).collect())
}

/// Adding a user who is already a member is a no-op.
pub async fn add_group_member(
    db: &DatabaseConnection,
    group_id: Uuid,
    user_id: Uuid,
) -> DbResult<GroupMember> {
    require_group(db, group_id).await?;
    require_user(db, user_id).await?;
    let existing = user_group_members::Entity::find_by_id((group_id, user_id))
        .one(db)
        .await?;
    if existing.is_none() {
        user_group_members::ActiveModel {
            group_id: Set(group_id),
            user_id: Set(user_id),
        }
        .insert(db)
        .await?;
        tracing::info!(%group_id, %user_id, "group member added");
    }
    Ok(GroupMember { group_id, user_id })
}

/// Removing a user who is not a member succeeds without changes.
pub async fn remove_group_member(
    db: &DatabaseConnection,
    group_id: Uuid,
    user_id: Uuid,
) -> DbResult<()> {
    require_group(db, group_id).await?;
    let result = user_group_members::Entity::delete_by_id((group_id, user_id))
        .exec(db)
        .await?;
    if result.rows_affected > 0 {
        tracing::info!(%group_id, %user_id, "group member removed");
    }
    Ok(())
}

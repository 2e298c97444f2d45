//! User group routes. Reads need `view_admin`, creating groups and changing
//! membership need `edit_admin`, deleting a group needs `manage_admin`.

use axum::{extract::State, http::StatusCode};
use platform_api::{ApiError, ApiResult};
use platform_db::{GroupMember, GroupRecord, NewGroup};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    extract::{Json, Path},
    guard::{Authorized, EditAdmin, ManageAdmin, ViewAdmin},
    http::{AppState, db_error},
    users::{Deleted, required_text, validate_department},
};

#[derive(Debug, Deserialize)]
pub struct MemberInput {
    pub user_id: Uuid,
}

pub async fn list(
    _auth: Authorized<ViewAdmin>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<GroupRecord>>> {
    let groups = platform_db::list_groups(&state.pool)
        .await
        .map_err(db_error)?;
    Ok(Json(groups))
}

pub async fn create(
    auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Json(mut input): Json<NewGroup>,
) -> ApiResult<(StatusCode, Json<GroupRecord>)> {
    input.name = required_text(&input.name, "name")?;
    if let Some(department) = &input.department {
        validate_department(&state, department)?;
    }
    if let Some(parent) = input.parent_id {
        let known = platform_db::find_group(&state.pool, parent)
            .await
            .map_err(db_error)?;
        if known.is_none() {
            return Err(ApiError::invalid(format!("unknown parent group {parent}")));
        }
    }
    let group = platform_db::create_group(&state.pool, input)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, group_id = %group.id, "group created");
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn remove(
    auth: Authorized<ManageAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deleted>> {
    platform_db::delete_group(&state.pool, id)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, group_id = %id, "group removed");
    Ok(Json(Deleted { success: true }))
}

pub async fn members(
    _auth: Authorized<ViewAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<GroupMember>>> {
    let members = platform_db::list_group_members(&state.pool, id)
        .await
        .map_err(db_error)?;
    Ok(Json(members))
}

pub async fn add_member(
    auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<MemberInput>,
) -> ApiResult<Json<GroupMember>> {
    let member = platform_db::add_group_member(&state.pool, id, input.user_id)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, group_id = %id, user_id = %input.user_id, "group member added");
    Ok(Json(member))
}

pub async fn remove_member(
    auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Deleted>> {
    platform_db::remove_group_member(&state.pool, id, user_id)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, group_id = %id, %user_id, "group member removed");
    Ok(Json(Deleted { success: true }))
}

//! User administration routes. Every handler is guarded by an
//! [`Authorized`] extractor naming the administrative token it needs.

use axum::{extract::State, http::StatusCode};
use platform_api::{ApiError, ApiResult};
use platform_db::{NewUser, UserPatch, UserRecord};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    extract::{Json, Path},
    guard::{Authorized, EditAdmin, ManageAdmin, ViewAdmin},
    http::{AppState, db_error},
};

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct DepartmentInput {
    pub department: String,
}

#[derive(Debug, Deserialize)]
pub struct PermissionInput {
    pub permission: String,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub success: bool,
}

pub async fn list(
    _auth: Authorized<ViewAdmin>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<UserRecord>>> {
    let users = platform_db::list_users(&state.pool)
        .await
        .map_err(db_error)?;
    Ok(Json(users))
}

pub async fn show(
    _auth: Authorized<ViewAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserRecord>> {
    platform_db::find_user(&state.pool, id)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn create(
    _auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Json(mut input): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<UserRecord>)> {
    input.name = required_text(&input.name, "name")?;
    input.email = required_email(&input.email)?;
    if let Some(role) = &input.role {
        validate_role(&state, role)?;
    }
    if let Some(department) = &input.department {
        validate_department(&state, department)?;
    }
    let user = platform_db::create_user(&state.pool, input)
        .await
        .map_err(db_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update(
    _auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut patch): Json<UserPatch>,
) -> ApiResult<Json<UserRecord>> {
    patch.name = patch
        .name
        .as_deref()
        .map(|name| required_text(name, "name"))
        .transpose()?;
    patch.email = patch.email.as_deref().map(required_email).transpose()?;
    let user = platform_db::update_user(&state.pool, id, patch)
        .await
        .map_err(db_error)?;
    Ok(Json(user))
}

pub async fn activate(
    _auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserRecord>> {
    let user = platform_db::set_active(&state.pool, id, true)
        .await
        .map_err(db_error)?;
    Ok(Json(user))
}

pub async fn deactivate(
    _auth: Authorized<EditAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserRecord>> {
    let user = platform_db::set_active(&state.pool, id, false)
        .await
        .map_err(db_error)?;
    Ok(Json(user))
}

pub async fn change_role(
    auth: Authorized<ManageAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<RoleInput>,
) -> ApiResult<Json<UserRecord>> {
    validate_role(&state, &input.role)?;
    let user = platform_db::set_role(&state.pool, id, &input.role)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, user_id = %id, role = %input.role, "role assigned");
    Ok(Json(user))
}

pub async fn change_department(
    _auth: Authorized<ManageAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<DepartmentInput>,
) -> ApiResult<Json<UserRecord>> {
    validate_department(&state, &input.department)?;
    let user = platform_db::set_department(&state.pool, id, &input.department)
        .await
        .map_err(db_error)?;
    Ok(Json(user))
}

pub async fn grant(
    auth: Authorized<ManageAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PermissionInput>,
) -> ApiResult<Json<UserRecord>> {
    validate_token(&state, &input.permission)?;
    let user = platform_db::grant_permission(&state.pool, id, &input.permission)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, user_id = %id, permission = %input.permission, "permission granted");
    Ok(Json(user))
}

pub async fn revoke(
    auth: Authorized<ManageAdmin>,
    State(state): State<AppState>,
    Path((id, token)): Path<(Uuid, String)>,
) -> ApiResult<Json<UserRecord>> {
    // Stale grants from an earlier catalog must stay removable.
    let user = platform_db::revoke_permission(&state.pool, id, &token)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, user_id = %id, permission = %token, "permission revoked");
    Ok(Json(user))
}

pub async fn remove(
    auth: Authorized<ManageAdmin>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deleted>> {
    platform_db::delete_user(&state.pool, id)
        .await
        .map_err(db_error)?;
    info!(actor = %auth.caller.user_id, user_id = %id, "user removed");
    Ok(Json(Deleted { success: true }))
}

pub(crate) fn required_text(value: &str, field: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn required_email(value: &str) -> ApiResult<String> {
    let email = required_text(value, "email")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::invalid("email is invalid")),
    }
}

fn validate_role(state: &AppState, role: &str) -> ApiResult<()> {
    if state.policy.catalog().is_known_role(role) {
        Ok(())
    } else {
        Err(ApiError::invalid(format!("unknown role {role}")))
    }
}

pub(crate) fn validate_department(state: &AppState, department: &str) -> ApiResult<()> {
    if state.policy.catalog().is_known_department(department) {
        Ok(())
    } else {
        Err(ApiError::invalid(format!("unknown department {department}")))
    }
}

fn validate_token(state: &AppState, token: &str) -> ApiResult<()> {
    if state.policy.catalog().is_known_token(token) {
        Ok(())
    } else {
        Err(ApiError::invalid(format!("unknown permission {token}")))
    }
}

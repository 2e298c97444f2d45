//! Request identity resolution and permission guards.
//!
//! Handlers declare what they need through their extractor types: `Caller`
//! data is resolved once per request from the bearer token, and
//! [`Authorized`] runs the access check before the handler body, so a
//! denied request never reaches the handler's own storage calls.

use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use platform_api::ApiError;
use platform_authn::{bearer_token, verify_token};
use platform_authz::{Identity, PermissionCatalog, tokens};
use tracing::debug;
use uuid::Uuid;

use crate::http::AppState;

/// Authenticated actor for the current request.
#[derive(Clone, Debug)]
pub struct Caller {
    pub user_id: Uuid,
    pub identity: Identity,
}

/// Caller if the request carries a valid token for an active user.
#[derive(Clone, Debug)]
pub struct MaybeCaller(pub Option<Caller>);

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        if let Some(cached) = parts.extensions.get::<MaybeCaller>() {
            return Ok(cached.clone());
        }
        let resolved = MaybeCaller(resolve(parts, state).await?);
        parts.extensions.insert(resolved.clone());
        Ok(resolved)
    }
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<Caller>, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Ok(token) = bearer_token(header) else {
        return Ok(None);
    };
    let claims = match verify_token(token, &state.config.tokens) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(error = %err, "rejecting bearer token");
            return Ok(None);
        }
    };
    let identity = platform_db::load_identity(&state.pool, claims.sub)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    Ok(identity.map(|identity| Caller {
        user_id: claims.sub,
        identity,
    }))
}

/// Any authenticated caller; 401 otherwise.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let MaybeCaller(caller) = MaybeCaller::from_request_parts(parts, state).await?;
        caller.map(Authenticated).ok_or(ApiError::Unauthorized)
    }
}

/// Permission token a route requires.
pub trait Requirement: Send + Sync + 'static {
    const TOKEN: &'static str;
}

macro_rules! requirement {
    ($(#[$meta:meta])* $name:ident => $token:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl Requirement for $name {
            const TOKEN: &'static str = $token;
        }
    };
}

requirement!(
    /// Read access to user administration.
    ViewAdmin => tokens::VIEW_ADMIN
);
requirement!(
    /// Profile and activation changes.
    EditAdmin => tokens::EDIT_ADMIN
);
requirement!(
    /// Role, department and grant changes, deletion.
    ManageAdmin => tokens::MANAGE_ADMIN
);

/// Caller that holds `R::TOKEN`. Rejects with 401 without a caller and with a
/// fixed 403 body when the token is missing.
pub struct Authorized<R> {
    pub caller: Caller,
    _requirement: PhantomData<R>,
}

impl<R: Requirement> FromRequestParts<AppState> for Authorized<R> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let MaybeCaller(caller) = MaybeCaller::from_request_parts(parts, state).await?;
        let identity = caller.as_ref().map(|c| &c.identity);
        if let Err(err) = state.policy.check(identity, R::TOKEN) {
            debug!(
                path = %parts.uri.path(),
                user_id = ?caller.as_ref().map(|c| c.user_id),
                required = R::TOKEN,
                "access denied"
            );
            return Err(err.into());
        }
        let caller = caller.ok_or(ApiError::Unauthorized)?;
        Ok(Self {
            caller,
            _requirement: PhantomData,
        })
    }
}

/// Tokens named by route guards; a configured catalog must define them all.
pub const ROUTE_TOKENS: [&str; 3] = [ViewAdmin::TOKEN, EditAdmin::TOKEN, ManageAdmin::TOKEN];

pub fn ensure_catalog_covers_routes(catalog: &PermissionCatalog) -> anyhow::Result<()> {
    let missing: Vec<&str> = ROUTE_TOKENS
        .into_iter()
        .filter(|token| !catalog.is_known_token(token))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "permission catalog does not define route tokens: {}",
            missing.join(", ")
        ))
    }
}

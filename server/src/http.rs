use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Json, Router,
    extract::State,
    http::{self, HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use platform_api::{ApiError, ApiResult};
use platform_authz::{CatalogSnapshot, PolicyEngine, TokenSet};
use platform_db::{DbError, DbPool};
use sea_orm::ConnectionTrait;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    graphql::SchemaType,
    groups,
    guard::{Authenticated, MaybeCaller},
    users,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub policy: PolicyEngine,
    pub config: Arc<AppConfig>,
    pub schema: SchemaType,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "back-office server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    let api = Router::new()
        .route("/me", get(me_handler))
        .route("/catalog", get(catalog_handler))
        .route("/users", get(users::list).post(users::create))
        .route(
            "/users/{id}",
            get(users::show).put(users::update).delete(users::remove),
        )
        .route("/users/{id}/activate", put(users::activate))
        .route("/users/{id}/deactivate", put(users::deactivate))
        .route("/users/{id}/role", put(users::change_role))
        .route("/users/{id}/department", put(users::change_department))
        .route("/users/{id}/permissions", post(users::grant))
        .route("/users/{id}/permissions/{token}", delete(users::revoke))
        .route("/groups", get(groups::list).post(groups::create))
        .route("/groups/{id}", delete(groups::remove))
        .route(
            "/groups/{id}/members",
            get(groups::members).post(groups::add_member),
        )
        .route(
            "/groups/{id}/members/{user_id}",
            delete(groups::remove_member),
        );

    Router::new()
        .route("/health", get(health_handler))
        .route("/graphql", post(graphql_handler))
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

async fn graphql_handler(
    State(state): State<AppState>,
    caller: MaybeCaller,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let req = request.into_inner().data(caller);
    state.schema.execute(req).await.into()
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub department: String,
    pub permissions: Vec<String>,
    pub effective_permissions: TokenSet,
}

async fn me_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> ApiResult<Json<MeResponse>> {
    let user = platform_db::find_user(&state.pool, caller.user_id)
        .await
        .map_err(db_error)?
        .ok_or(ApiError::Unauthorized)?;
    let effective_permissions = state.policy.effective_permissions(&user.identity());
    Ok(Json(MeResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        department: user.department,
        permissions: user.permissions,
        effective_permissions,
    }))
}

async fn catalog_handler(
    State(state): State<AppState>,
    _caller: Authenticated,
) -> Json<CatalogSnapshot> {
    Json(state.policy.catalog().snapshot())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.pool.get_database_backend();
    let db_ok = state
        .pool
        .execute(sea_orm::Statement::from_string(backend, "SELECT 1".to_string()))
        .await
        .is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

pub(crate) fn db_error(err: DbError) -> ApiError {
    match err {
        DbError::NotFound => ApiError::NotFound,
        DbError::Conflict(msg) => ApiError::Conflict(msg),
        other => ApiError::internal(other.into()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };

    info!("shutdown signal received");
}

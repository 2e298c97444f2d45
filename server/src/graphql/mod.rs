mod me;

use async_graphql::{
    Context, EmptyMutation, EmptySubscription, ErrorExtensions, Object, Schema, SimpleObject,
};
use platform_api::ApiError;
use platform_authz::PolicyEngine;
use platform_db::DbPool;
use tracing::instrument;

use crate::guard::{Caller, MaybeCaller};
use crate::http::db_error;

pub use me::{CatalogPayload, MePayload};

pub type SchemaType = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

#[derive(Clone)]
pub struct GraphqlData {
    pub pool: DbPool,
    pub policy: PolicyEngine,
}

pub fn build_schema(data: GraphqlData) -> SchemaType {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(data)
        .finish()
}

fn caller<'a>(ctx: &'a Context<'_>) -> async_graphql::Result<&'a Caller> {
    ctx.data_opt::<MaybeCaller>()
        .and_then(|MaybeCaller(caller)| caller.as_ref())
        .ok_or_else(|| ApiError::Unauthorized.extend())
}

#[derive(Default)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    #[instrument(name = "graphql.health", skip_all)]
    async fn health(&self) -> HealthPayload {
        HealthPayload { ok: true }
    }

    #[instrument(name = "graphql.version", skip_all)]
    async fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    #[instrument(name = "graphql.me", skip_all)]
    async fn me(&self, ctx: &Context<'_>) -> async_graphql::Result<MePayload> {
        let caller = caller(ctx)?;
        let data = ctx.data::<GraphqlData>()?;
        let user = platform_db::find_user(&data.pool, caller.user_id)
            .await
            .map_err(|err| db_error(err).extend())?
            .ok_or_else(|| ApiError::Unauthorized.extend())?;
        Ok(MePayload::from_record(&data.policy, user))
    }

    #[instrument(name = "graphql.catalog", skip_all)]
    async fn catalog(&self, ctx: &Context<'_>) -> async_graphql::Result<CatalogPayload> {
        caller(ctx)?;
        let data = ctx.data::<GraphqlData>()?;
        Ok(CatalogPayload::from_catalog(data.policy.catalog()))
    }

    /// Whether the caller holds `permission`.
    #[instrument(name = "graphql.can", skip_all)]
    async fn can(&self, ctx: &Context<'_>, permission: String) -> async_graphql::Result<bool> {
        let caller = caller(ctx)?;
        let data = ctx.data::<GraphqlData>()?;
        if !data.policy.catalog().is_known_token(&permission) {
            return Err(ApiError::invalid(format!("unknown permission {permission}")).extend());
        }
        Ok(data.policy.is_allowed(Some(&caller.identity), &permission))
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct HealthPayload {
    pub ok: bool,
}

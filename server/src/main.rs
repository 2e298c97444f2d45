mod config;
mod extract;
mod graphql;
mod groups;
mod guard;
mod http;
mod users;


use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use platform_authn::issue_token;
use platform_authz::{PolicyEngine, roles};
use platform_db::{DatabaseSettings, DbPool, NewUser, UserStatus, connect};
use platform_obs::{ObsConfig, init_tracing};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    graphql::GraphqlData,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "backoffice-server", version, about = "Travel back-office administration server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP + GraphQL server.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Create the first administrator account if it does not exist.
    Seed(SeedCommand),
    /// Print a bearer token for an existing user.
    #[command(name = "token:issue")]
    TokenIssue {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Print the resolved permission catalog as JSON.
    #[command(name = "catalog:print")]
    CatalogPrint,
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

#[derive(Args, Debug)]
struct SeedCommand {
    #[arg(long, default_value = "admin@example.com")]
    email: String,
    #[arg(long, default_value = "Administrator")]
    name: String,
}

impl From<ServeCommand> for ServeConfig {
    fn from(value: ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(ObsConfig::from_env())?;
    let cli = Cli::parse();
    // Each command reads only the settings it uses.
    match cli.command {
        Command::Serve(cmd) => run_server(cmd, Arc::new(AppConfig::load()?)).await,
        Command::Migrate(action) => {
            let database = DatabaseSettings::from_env();
            match action {
                MigrateCommand::Up => migrate_up(&database).await,
                MigrateCommand::Down => migrate_down(&database).await,
            }
        }
        Command::Seed(cmd) => run_seed(cmd, &DatabaseSettings::from_env()).await,
        Command::TokenIssue { user_id } => print_token(user_id, &AppConfig::load()?).await,
        Command::CatalogPrint => catalog_print(config::catalog_path_from_env().as_deref()),
    }
}

async fn setup_pool(database: &DatabaseSettings) -> Result<DbPool> {
    connect(database).await.context("connecting to database")
}

async fn run_server(cmd: ServeCommand, config: Arc<AppConfig>) -> Result<()> {
    let pool = setup_pool(&config.database).await?;
    ensure_migrations(&pool, cmd.allow_dirty).await?;
    let catalog = config.permission_catalog()?;
    guard::ensure_catalog_covers_routes(&catalog)?;
    let policy = PolicyEngine::new(Arc::new(catalog));
    let schema = graphql::build_schema(GraphqlData {
        pool: pool.clone(),
        policy: policy.clone(),
    });
    let state = AppState {
        pool,
        policy,
        config,
        schema,
    };
    http::serve(cmd.into(), state).await
}

async fn ensure_migrations(pool: &DbPool, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "pending migrations detected; run `cargo run -p server -- migrate up` or pass --allow-dirty"
        );
    }
    Ok(())
}

async fn migrate_up(database: &DatabaseSettings) -> Result<()> {
    let pool = setup_pool(database).await?;
    Migrator::up(&pool, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down(database: &DatabaseSettings) -> Result<()> {
    let pool = setup_pool(database).await?;
    Migrator::down(&pool, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}

async fn run_seed(cmd: SeedCommand, database: &DatabaseSettings) -> Result<()> {
    let pool = setup_pool(database).await?;
    if let Some(existing) = platform_db::find_user_by_email(&pool, &cmd.email).await? {
        info!(user_id = %existing.id, email = %existing.email, "administrator already present");
        println!("{}", existing.id);
        return Ok(());
    }
    let user = platform_db::create_user(
        &pool,
        NewUser {
            name: cmd.name,
            email: cmd.email,
            role: Some(roles::ADMIN.to_string()),
            department: Some(platform_authz::departments::ADMINISTRATIVE.to_string()),
            status: Some(UserStatus::Active),
            ..NewUser::default()
        },
    )
    .await?;
    info!(user_id = %user.id, "administrator seeded");
    println!("{}", user.id);
    Ok(())
}

async fn print_token(user_id: Uuid, config: &AppConfig) -> Result<()> {
    let pool = setup_pool(&config.database).await?;
    if platform_db::load_identity(&pool, user_id).await?.is_none() {
        return Err(anyhow!("user {user_id} not found or inactive"));
    }
    let token = issue_token(user_id, &config.tokens)?;
    println!("{token}");
    Ok(())
}

fn catalog_print(path: Option<&std::path::Path>) -> Result<()> {
    let catalog = config::load_catalog(path)?;
    guard::ensure_catalog_covers_routes(&catalog)?;
    println!("{}", serde_json::to_string_pretty(&catalog.snapshot())?);
    Ok(())
}

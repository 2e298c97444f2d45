use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use platform_authn::TokenConfig;
use platform_authz::PermissionCatalog;
use platform_db::DatabaseSettings;
use tracing::info;

const DEFAULT_TOKEN_TTL_MINUTES: i64 = 8 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub tokens: TokenConfig,
    pub cors_allowed_origins: Vec<String>,
    pub catalog_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let database = DatabaseSettings::from_env();

        let secret = std::env::var("JWT_SECRET_BASE64").context("JWT_SECRET_BASE64 missing")?;
        let secret_bytes = STANDARD
            .decode(secret.trim())
            .context("invalid JWT_SECRET_BASE64")?;
        if secret_bytes.len() < 32 {
            return Err(anyhow!(
                "JWT_SECRET_BASE64 must decode to at least 32 bytes"
            ));
        }
        let ttl_minutes = match std::env::var("TOKEN_TTL_MINUTES") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|ttl| *ttl > 0)
                .ok_or_else(|| anyhow!("TOKEN_TTL_MINUTES must be a positive integer"))?,
            Err(_) => DEFAULT_TOKEN_TTL_MINUTES,
        };

        let cors_allowed_origins = parse_origins(
            &std::env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".into()),
        );

        Ok(Self {
            database,
            tokens: TokenConfig::new(secret_bytes, ttl_minutes),
            cors_allowed_origins,
            catalog_path: catalog_path_from_env(),
        })
    }

    pub fn permission_catalog(&self) -> Result<PermissionCatalog> {
        load_catalog(self.catalog_path.as_deref())
    }
}

pub fn catalog_path_from_env() -> Option<PathBuf> {
    std::env::var("PERMISSION_CATALOG_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Built-in catalog unless a JSON document is configured.
pub fn load_catalog(path: Option<&Path>) -> Result<PermissionCatalog> {
    match path {
        Some(path) => {
            let catalog = PermissionCatalog::load(path)
                .with_context(|| format!("loading permission catalog {}", path.display()))?;
            info!(path = %path.display(), "custom permission catalog loaded");
            Ok(catalog)
        }
        None => Ok(PermissionCatalog::standard()),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

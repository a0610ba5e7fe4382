use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
///
/// Credentials for managed accounts never live here; they come from the
/// account store. `redis_url` addresses an external queue backend deployment
/// and is threaded into backend construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub admin_key: Option<String>,
    pub concurrency_default: usize,
    pub log_level: String,
    pub node_env: String,
    pub bsky_service: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let redis_url = match env::var("REDIS_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                let db = env::var("REDIS_DB").unwrap_or_else(|_| "0".to_string());
                match env::var("REDIS_AUTH") {
                    Ok(auth) => format!("redis://:{auth}@{host}:{port}/{db}"),
                    Err(_) => format!("redis://{host}:{port}/{db}"),
                }
            }
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        if !matches!(log_level.as_str(), "error" | "warn" | "info" | "debug") {
            bail!("LOG_LEVEL must be one of error|warn|info|debug, got {log_level}");
        }

        Ok(Self {
            redis_url,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            admin_key: env::var("ADMIN_KEY").ok().filter(|k| !k.is_empty()),
            concurrency_default: env::var("CONCURRENCY_DEFAULT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("CONCURRENCY_DEFAULT must be a valid number")?,
            log_level,
            node_env: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
            bsky_service: env::var("BSKY_SERVICE")
                .unwrap_or_else(|_| bsky::DEFAULT_SERVICE.to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }

    /// Whether the queue-admin surface requires the admin key.
    pub fn admin_key_required(&self) -> bool {
        self.is_production() && self.admin_key.is_some()
    }
}

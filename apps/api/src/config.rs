use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Newest items kept per (document, type).
    pub item_cache_limit: usize,
    pub generation_deadline_secs: u64,
    pub manual_dir: PathBuf,
    /// Optional JSON file overriding model tiers.
    pub generation_config_path: Option<PathBuf>,
    pub grammar_baseline_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            item_cache_limit: parse_env("ITEM_CACHE_LIMIT", 1000)
                .context("ITEM_CACHE_LIMIT must be a positive integer")?,
            generation_deadline_secs: parse_env("GENERATION_DEADLINE_SECS", 90)
                .context("GENERATION_DEADLINE_SECS must be a number of seconds")?,
            manual_dir: std::env::var("MANUAL_DIR")
                .unwrap_or_else(|_| "manuals".to_string())
                .into(),
            generation_config_path: optional_env("GENERATION_CONFIG_PATH").map(PathBuf::from),
            grammar_baseline_path: optional_env("GRAMMAR_BASELINE_PATH").map(PathBuf::from),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => Ok(raw.trim().parse::<T>()?),
        None => Ok(default),
    }
}

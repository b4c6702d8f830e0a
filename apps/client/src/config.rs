use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_STORAGE_DIR: &str = ".gtm-client";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Client configuration loaded from environment variables.
/// Every variable has a default; only malformed values are errors.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub storage_dir: PathBuf,
    /// Bearer token for authenticated routes. `None` runs in demo mode.
    pub api_token: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let request_timeout = match optional_env("GTM_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .context("GTM_REQUEST_TIMEOUT_SECS must be a whole number of seconds")?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Config {
            api_url: optional_env("GTM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            storage_dir: optional_env("GTM_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            api_token: optional_env("GTM_API_TOKEN"),
            user_id: optional_env("GTM_USER_ID"),
            request_timeout: Duration::from_secs(request_timeout),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            api_token: None,
            user_id: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            rust_log: "info".to_string(),
        }
    }
}

/// Reads an env var, treating blank values as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

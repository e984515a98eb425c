//! Application configuration loaded from environment variables.
//!
//! Remote-store connection parameters are required; everything else has a
//! development default. Missing required values abort startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default cache bucket name. Bump on every deploy that changes shell assets.
pub const DEFAULT_CACHE_VERSION: &str = "rezeptbuddy-v1";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Remote store connection (required) ---
    /// Firebase / GCP project ID hosting the `recipes` collection
    pub firebase_project_id: String,
    /// Storage bucket holding recipe images
    pub storage_bucket: String,

    // --- Optional ---
    /// Origin the network cache proxies to
    pub app_origin_url: String,
    /// Versioned cache bucket name
    pub cache_version: String,
    /// Location of the durable local cache
    pub cache_db_path: PathBuf,
    /// Proxy port
    pub port: u16,
    /// How long the navigation gate waits for the first identity
    pub auth_ready_timeout: Duration,
    /// OAuth client ID accepted as audience for Google ID tokens
    pub google_client_id: Option<String>,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            firebase_project_id: "test-project".to_string(),
            storage_bucket: "test-project.firebasestorage.app".to_string(),
            app_origin_url: "http://localhost:5173".to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            cache_db_path: PathBuf::from(".recipe-sync/cache.db"),
            port: 8080,
            auth_ready_timeout: Duration::from_millis(3000),
            google_client_id: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let timeout_ms = env::var("AUTH_READY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3000);

        Ok(Self {
            firebase_project_id: required("FIREBASE_PROJECT_ID")?,
            storage_bucket: required("FIREBASE_STORAGE_BUCKET")?,
            app_origin_url: env::var("APP_ORIGIN_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            cache_version: env::var("CACHE_VERSION")
                .unwrap_or_else(|_| DEFAULT_CACHE_VERSION.to_string()),
            cache_db_path: env::var("CACHE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".recipe-sync/cache.db")),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            auth_ready_timeout: Duration::from_millis(timeout_ms),
            google_client_id: env::var("GOOGLE_CLIENT_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

/// Read a required variable; blank counts as missing.
fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

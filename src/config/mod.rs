pub mod env;
pub use env::{EnvSource, ProcessEnv, ENCRYPTION_KEY_VAR};

use crate::platform::Platform;
use serde::Deserialize;
use std::collections::HashMap;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Per-platform endpoint overrides, keyed by platform id
    #[serde(default)]
    pub platforms: HashMap<Platform, EndpointOverride>,
    /// Locally known sessions (bearer token -> user)
    #[serde(default)]
    pub sessions: Vec<SessionSeed>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Dashboard origins allowed to call the API cross-origin (empty = no CORS layer)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Connection storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "revlink.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Redirect URI registered with every provider
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Lifetime of the `oauth_state` cookie
    #[serde(default = "default_state_cookie_max_age")]
    pub state_cookie_max_age_seconds: i64,
    /// Target origin for the popup's postMessage
    #[serde(default = "default_post_message_origin")]
    pub post_message_origin: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/auth/callback".to_string()
}

fn default_state_cookie_max_age() -> i64 {
    600
}

fn default_post_message_origin() -> String {
    "*".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            redirect_uri: default_redirect_uri(),
            state_cookie_max_age_seconds: default_state_cookie_max_age(),
            post_message_origin: default_post_message_origin(),
        }
    }
}

/// Downstream sync trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the function runner; sync is log-only when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_sync_function")]
    pub function_name: String,
}

fn default_sync_function() -> String {
    "syncPlatformData".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            function_name: default_sync_function(),
        }
    }
}

/// Endpoint overrides for one platform
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointOverride {
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

/// A bearer session known to the local identity directory
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSeed {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&contents)?;
    Ok(config)
}

//! Client configuration.
//!
//! Layered with `figment`: built-in defaults, then an optional YAML file
//! (`todo.yaml`, or the path in `TODO_CONFIG`), then `TODO_`-prefixed
//! environment variables. Nested keys use `__`, e.g. `TODO_LOGGING__LEVEL`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_client::DEFAULT_LOGIN_PATH;

pub const DEFAULT_CONFIG_FILE: &str = "todo.yaml";
pub const CONFIG_PATH_ENV: &str = "TODO_CONFIG";
const ENV_PREFIX: &str = "TODO_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid logging.level '{0}'. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("could not install log subscriber: {0}")]
    Logging(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the todo API.
    pub api_url: String,
    pub timeout_ms: u64,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    /// Public origin of the app; the OAuth callback lives under it.
    pub site_url: String,
    pub login_path: String,
    /// Where the session record is kept. Defaults to the platform data dir.
    pub storage_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            timeout_ms: 10_000,
            supabase_url: None,
            supabase_anon_key: None,
            site_url: "http://localhost:5173".to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            storage_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Controls how tracing output is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,  // "trace" | "debug" | "info" | "warn" | "error"
    pub format: String, // "console" | "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load from `TODO_CONFIG` (or `./todo.yaml`) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load with an explicit YAML path. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Where the identity provider sends the browser back to.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.site_url.trim_end_matches('/'))
    }
}

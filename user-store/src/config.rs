//! Configuration for user-store
//!
//! Loaded from a TOML file. [`Config::load`] additionally layers
//! `USER_STORE__<SECTION>__<KEY>` environment variables on top of the file,
//! e.g. `USER_STORE__STORE__DATABASE_URL=sqlite://other.db`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::users::types::{
    Quota, DEFAULT_DOWNLOAD_SPEED_LIMIT, DEFAULT_SPACE_LIMIT, DEFAULT_UPLOAD_SPEED_LIMIT,
};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "USER_STORE";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub quota: QuotaDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// SQLite URL (e.g., "sqlite://users.db")
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// Per-operation deadline in seconds, 0 disables it
    #[serde(default)]
    pub operation_timeout_secs: u64,
}

/// Quota handed to newly created users
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaDefaults {
    #[serde(default = "default_space_limit")]
    pub space_limit: i64,
    #[serde(default = "default_speed_limit")]
    pub upload_speed_limit: i32,
    #[serde(default = "default_speed_limit")]
    pub download_speed_limit: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_database_url() -> String {
    "sqlite://users.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_space_limit() -> i64 {
    DEFAULT_SPACE_LIMIT
}

fn default_speed_limit() -> i32 {
    DEFAULT_UPLOAD_SPEED_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            operation_timeout_secs: 0,
        }
    }
}

impl StoreConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Per-operation deadline, if configured
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            space_limit: DEFAULT_SPACE_LIMIT,
            upload_speed_limit: DEFAULT_UPLOAD_SPEED_LIMIT,
            download_speed_limit: DEFAULT_DOWNLOAD_SPEED_LIMIT,
        }
    }
}

impl QuotaDefaults {
    pub fn to_quota(&self) -> Quota {
        Quota {
            space_limit: self.space_limit,
            upload_speed_limit: self.upload_speed_limit,
            download_speed_limit: self.download_speed_limit,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| StoreError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(true),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Render as TOML (used by `user-admin config`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.store.database_url.starts_with("sqlite:") {
            return Err(StoreError::Config(format!(
                "Unsupported database URL '{}': only sqlite is supported",
                self.store.database_url
            )));
        }

        if self.store.max_connections == 0 {
            return Err(StoreError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        self.quota
            .to_quota()
            .validate()
            .map_err(|e| StoreError::Config(format!("Invalid default quota: {}", e)))?;

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(StoreError::Config(format!("Unknown log format '{}'", other))),
        }
    }
}

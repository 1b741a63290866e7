use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use common::export::ExportConfig;
use common::upcall::DEFAULT_SHUTDOWN_GRACE;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "s3ns";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Process configuration, read from `~/.s3ns/config.toml` by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default tracing level; `RUST_LOG` still takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily log files (stdout only if not set)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Invalidation daemon period; 0 disables it
    #[serde(default)]
    pub up_interval_secs: u64,
    /// How long a stopping daemon is waited for before it is aborted
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub exports: Vec<ExportConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            up_interval_secs: 0,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            exports: Vec::new(),
        }
    }
}

impl Config {
    /// The config file path (custom or default ~/.s3ns/config.toml)
    pub fn path(custom_path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)).join(CONFIG_FILE_NAME))
    }

    /// Load and check the config file
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = Self::path(custom_path)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        raw.parse()
    }

    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }

    pub fn up_interval(&self) -> Duration {
        Duration::from_secs(self.up_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Export by display name
    pub fn export(&self, name: &str) -> Option<&ExportConfig> {
        self.exports.iter().find(|e| e.display_name() == name)
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.level()?;
        for (i, export) in self.exports.iter().enumerate() {
            let name = export.display_name();
            if self.exports[..i].iter().any(|e| e.display_name() == name) {
                return Err(ConfigError::Invalid(format!(
                    "export name '{}' is used more than once",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(raw)?;
        config.check()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("config file not found at {0}")]
    NotFound(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

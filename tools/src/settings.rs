//! Toolkit configuration loading
//!
//! Sources, in order of preference:
//! - the YAML file named by `CONFIG_PATH`, the caller, or `config/config.yaml`
//! - `LOGGER_*` environment variables (a `.env` file is loaded first if present)

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::LogConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Config file error: {0}")]
    File(#[from] config::ConfigError),

    #[error("Environment error: {0}")]
    Env(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Top level toolkit configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub logger: LogConfig,
}

impl ToolsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> SettingsResult<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let logger = LogConfig::from_env().map_err(|e| SettingsError::Env(format!("{e:#}")))?;

        Ok(Self { logger })
    }

    /// Load configuration from a YAML file; missing sections keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// `CONFIG_PATH` wins over `path`, which wins over [`DEFAULT_CONFIG_PATH`].
    /// Without a file at the resolved path the environment is used instead.
    pub fn load(path: Option<&str>) -> SettingsResult<Self> {
        dotenvy::dotenv().ok();

        let resolved = resolve_path(env::var(CONFIG_PATH_ENV).ok(), path);

        if Path::new(&resolved).is_file() {
            tracing::debug!(path = %resolved, "Loading configuration file");
            Self::from_file(&resolved)
        } else {
            tracing::debug!(path = %resolved, "No configuration file, reading environment");
            Self::from_env()
        }
    }
}

fn resolve_path(from_env: Option<String>, explicit: Option<&str>) -> String {
    from_env
        .filter(|p| !p.is_empty())
        .or_else(|| explicit.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

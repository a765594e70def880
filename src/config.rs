//! Configuration management for tasksync.
//!
//! Configuration can be set via environment variables:
//! - `TASKSYNC_BASE_URL` - Required. API root of the remote task service (with trailing slash).
//! - `TASKSYNC_TOKEN` - Required. Bearer token for the service.
//! - `TASKSYNC_LIST` - Required. Identifier of the task list to edit.
//! - `TASKSYNC_UPDATE_DEBOUNCE_MS` - Optional. Edit coalescing window. Defaults to `250`.
//! - `TASKSYNC_MOVE_DEBOUNCE_MS` - Optional. Reorder coalescing window. Defaults to `500`.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::engine::EngineSettings;
use crate::task::TaskListId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API root of the remote task service
    pub base_url: Url,

    /// Bearer token
    pub token: String,

    /// Task list being edited
    pub list: TaskListId,

    /// Edit coalescing window
    pub update_debounce: Duration,

    /// Reorder coalescing window
    pub move_debounce: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if a required variable is
    /// not set, `ConfigError::InvalidValue` if one fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("TASKSYNC_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("TASKSYNC_BASE_URL".to_string()))?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidValue("TASKSYNC_BASE_URL".to_string(), e.to_string())
        })?;

        let token = std::env::var("TASKSYNC_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TASKSYNC_TOKEN".to_string()))?;

        let list = std::env::var("TASKSYNC_LIST")
            .map_err(|_| ConfigError::MissingEnvVar("TASKSYNC_LIST".to_string()))?;

        let update_debounce = duration_var("TASKSYNC_UPDATE_DEBOUNCE_MS", 250)?;
        let move_debounce = duration_var("TASKSYNC_MOVE_DEBOUNCE_MS", 500)?;

        Ok(Self {
            base_url,
            token,
            list: TaskListId::new(list),
            update_debounce,
            move_debounce,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(base_url: Url, token: impl Into<String>, list: TaskListId) -> Self {
        Self {
            base_url,
            token: token.into(),
            list,
            update_debounce: Duration::from_millis(250),
            move_debounce: Duration::from_millis(500),
        }
    }

    /// Engine tunables derived from this config.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            update_debounce: self.update_debounce,
            move_debounce: self.move_debounce,
            ..EngineSettings::default()
        }
    }
}

fn duration_var(name: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(Duration::from_millis(default_ms)),
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}

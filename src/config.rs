//! Runtime configuration read from the process environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::model_store::{ModelStore, MODEL_PATH_ENV};

pub const APP_URL_ENV: &str = "FF_APP_URL";
pub const API_KEY_ENV: &str = "FF_API_KEY";
pub const TIMEOUT_ENV: &str = "TXCAT_HTTP_TIMEOUT_SECS";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value '{value}' for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Connection settings for the Firefly III API
#[derive(Clone)]
pub struct FireflyConfig {
    /// Firefly III base URL without a trailing slash
    pub app_url: String,
    /// Personal access token sent as a bearer token
    pub api_key: String,
}

impl std::fmt::Debug for FireflyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireflyConfig")
            .field("app_url", &self.app_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Where the persisted model lives and, when configured, how to reach Firefly III.
///
/// Firefly settings are only needed to train on a cold start and to report
/// categories back, so a process that only serves an existing model can run
/// without them.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub firefly: Option<FireflyConfig>,
    pub model_path: PathBuf,
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let firefly = match (optional(APP_URL_ENV), optional(API_KEY_ENV)) {
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(API_KEY_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(APP_URL_ENV)),
            (Some(url), Some(api_key)) => {
                let app_url = url.trim_end_matches('/').to_string();
                if !(app_url.starts_with("http://") || app_url.starts_with("https://")) {
                    return Err(ConfigError::Invalid {
                        var: APP_URL_ENV,
                        value: app_url,
                    });
                }
                Some(FireflyConfig { app_url, api_key })
            }
        };

        let http_timeout = match lookup(TIMEOUT_ENV).filter(|v| !v.trim().is_empty()) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: TIMEOUT_ENV,
                        value: raw,
                    })
                }
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let model_path = optional(MODEL_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(ModelStore::platform_model_path);

        Ok(Self {
            firefly,
            model_path,
            http_timeout,
        })
    }

    /// Firefly settings, required for anything that talks to the API
    pub fn firefly(&self) -> Result<&FireflyConfig, ConfigError> {
        self.firefly.as_ref().ok_or(ConfigError::Missing(APP_URL_ENV))
    }

    /// Overrides the model path, typically from the command line
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = path.into();
        self
    }
}

//! services/podcast/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_ENDPOINT: &str = "wss://openspeech.bytedance.com/api/v3/sami/podcasttts";
pub const DEFAULT_APP_KEY: &str = "aGjiRDfUWi";
pub const DEFAULT_RESOURCE_ID: &str = "volc.service_type.10050";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: String,
    pub app_id: String,
    pub app_key: String,
    pub access_key: String,
    pub resource_id: String,
    pub log_level: Level,
    pub retry_budget: u32,
    pub retry_backoff: Duration,
    pub receive_timeout: Duration,
    pub output_dir: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Credentials ---
        let app_id = required(&lookup, "PODCAST_APP_ID")?;
        let access_key = required(&lookup, "PODCAST_ACCESS_KEY")?;
        let app_key = lookup("PODCAST_APP_KEY").unwrap_or_else(|| DEFAULT_APP_KEY.to_string());
        let resource_id =
            lookup("PODCAST_RESOURCE_ID").unwrap_or_else(|| DEFAULT_RESOURCE_ID.to_string());
        let endpoint = lookup("PODCAST_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Retry policy ---
        let retry_budget: u32 = parsed(&lookup, "PODCAST_RETRY_BUDGET", 3)?;
        if retry_budget == 0 {
            return Err(ConfigError::InvalidValue(
                "PODCAST_RETRY_BUDGET".to_string(),
                "must allow at least one attempt".to_string(),
            ));
        }
        let retry_backoff =
            Duration::from_millis(parsed(&lookup, "PODCAST_RETRY_BACKOFF_MS", 1000)?);
        let receive_timeout =
            Duration::from_secs(parsed(&lookup, "PODCAST_RECEIVE_TIMEOUT_SECS", 30)?);

        let output_dir = lookup("PODCAST_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Ok(Self {
            endpoint,
            app_id,
            app_key,
            access_key,
            resource_id,
            log_level,
            retry_budget,
            retry_backoff,
            receive_timeout,
            output_dir,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = Config::from_lookup(lookup_from(&[
            ("PODCAST_APP_ID", "app"),
            ("PODCAST_ACCESS_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.app_key, DEFAULT_APP_KEY);
        assert_eq!(config.resource_id, DEFAULT_RESOURCE_ID);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.receive_timeout, Duration::from_secs(30));
        assert_eq!(config.output_dir, PathBuf::from("./output"));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = Config::from_lookup(lookup_from(&[("PODCAST_APP_ID", "app")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "PODCAST_ACCESS_KEY"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("PODCAST_APP_ID", "app"),
            ("PODCAST_ACCESS_KEY", "secret"),
            ("PODCAST_RETRY_BUDGET", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "PODCAST_RETRY_BUDGET"));

        let err = Config::from_lookup(lookup_from(&[
            ("PODCAST_APP_ID", "app"),
            ("PODCAST_ACCESS_KEY", "secret"),
            ("PODCAST_RETRY_BUDGET", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(..)));
    }

    #[test]
    fn overrides_are_honoured() {
        let config = Config::from_lookup(lookup_from(&[
            ("PODCAST_APP_ID", "app"),
            ("PODCAST_ACCESS_KEY", "secret"),
            ("PODCAST_RESOURCE_ID", "custom.resource"),
            ("RUST_LOG", "debug"),
            ("PODCAST_RETRY_BACKOFF_MS", "250"),
            ("PODCAST_RECEIVE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.resource_id, "custom.resource");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.receive_timeout, Duration::from_secs(5));
    }
}

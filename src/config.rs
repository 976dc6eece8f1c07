use std::{env, str::FromStr};

use dotenvy::dotenv;
use thiserror::Error;
use validator::Validate;

pub const DEFAULT_SECRET_KEY: &str = "change-me";

/// 50 MiB
pub const DEFAULT_MAX_REQUEST_SIZE: u64 = 50 * 1024 * 1024;

/// 5 GiB
pub const MAX_REQUEST_SIZE_LIMIT: u64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub database_url: String,
    pub upload_dir: String,
    #[validate(range(min = 1, max = MAX_REQUEST_SIZE_LIMIT))]
    pub max_request_size: u64,
    /// `None` accepts every extension.
    pub allowed_extensions: Option<Vec<String>>,
    #[validate(length(min = 1))]
    pub secret_key: String,
    pub bind_addr: String,
    pub reconcile_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://database.db".to_string(),
            upload_dir: "uploads".to_string(),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            allowed_extensions: None,
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            bind_addr: "0.0.0.0:5000".to_string(),
            reconcile_on_startup: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load environment variables from `.env` file (if it exists)
        dotenv().ok();

        let defaults = Config::default();

        let allowed_extensions = env::var("ALLOWED_EXTENSIONS")
            .ok()
            .map(|raw| parse_extensions(&raw))
            .filter(|exts| !exts.is_empty());

        let config = Config {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or(defaults.upload_dir),
            max_request_size: parse_var("MAX_REQUEST_SIZE", defaults.max_request_size)?,
            allowed_extensions,
            secret_key: env::var("SECRET_KEY").unwrap_or(defaults.secret_key),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            reconcile_on_startup: parse_var("RECONCILE_ON_STARTUP", defaults.reconcile_on_startup)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// True when the session secret was never changed from the shipped default.
    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

/// Parses a comma separated extension list such as `"pdf, .PNG,txt"`.
pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extensions_normalizes_entries() {
        assert_eq!(parse_extensions("pdf, .PNG,,txt "), vec!["pdf", "png", "txt"]);
        assert!(parse_extensions(" , ").is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_request_size, 52_428_800);
        assert!(config.uses_default_secret());
    }

    #[test]
    fn test_request_size_above_limit_is_rejected() {
        let at_limit = Config {
            max_request_size: MAX_REQUEST_SIZE_LIMIT,
            ..Config::default()
        };
        assert!(at_limit.validate().is_ok());

        let over_limit = Config {
            max_request_size: 5 * 1024 * 1024 * 1024 + 1,
            ..Config::default()
        };
        assert!(over_limit.validate().is_err());
    }

    #[test]
    fn test_zero_request_size_is_rejected() {
        let config = Config {
            max_request_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

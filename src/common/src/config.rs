//! Configuration loading from environment variables.

use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),
}

/// Shared service configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL. Row persistence is disabled when unset.
    pub database_url: Option<String>,

    /// Maximum pooled database connections
    pub db_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional variables (with defaults):
    /// - DATABASE_URL: PostgreSQL connection string (none)
    /// - DB_MAX_CONNECTIONS: Pool size (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        if let Some(ref url) = database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            db_max_connections,
        })
    }

    /// Database URL, or an error naming the missing variable.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_without_database_url() {
        env::remove_var("DATABASE_URL");
        env::remove_var("DB_MAX_CONNECTIONS");

        let config = Config::from_env_only().unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.db_max_connections, 10);

        if let Err(ConfigError::MissingVar(var)) = config.require_database_url() {
            assert_eq!(var, "DATABASE_URL");
        } else {
            panic!("Expected MissingVar error");
        }
    }

    #[test]
    #[serial]
    fn test_config_with_database_url() {
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("DB_MAX_CONNECTIONS", "4");

        let config = Config::from_env_only().unwrap();

        assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/test");
        assert_eq!(config.db_max_connections, 4);

        // Cleanup
        env::remove_var("DATABASE_URL");
        env::remove_var("DB_MAX_CONNECTIONS");
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_postgres_url() {
        env::set_var("DATABASE_URL", "mysql://localhost/test");

        let result = Config::from_env_only();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));

        env::remove_var("DATABASE_URL");
    }
}

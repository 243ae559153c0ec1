//! CLI configuration file
//!
//! YAML by default, JSON when the file ends in `.json`:
//!
//! ```yaml
//! connector:
//!   kind: postgres
//!   user: app
//!   password: secret
//!   host: localhost
//!   port: 5432
//!   database: app
//!   parameters:
//!     mode: disable
//! pool:
//!   max_open_connections: 10
//! retry:
//!   max_attempts: 20
//! migrations: ./migrations
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dbkit::{PoolConfig, RetryPolicy};
use dbkit_connectors::{ConnectorConfig, Raw};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("no database configured: set `connector` in the config file or DATABASE_URL")]
    MissingConnector,
}

/// Pool settings; zero or missing values use the library defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub max_lifetime_seconds: u64,
    pub max_idle_time_seconds: u64,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
}

impl PoolSection {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_lifetime: Duration::from_secs(self.max_lifetime_seconds),
            max_idle_time: Duration::from_secs(self.max_idle_time_seconds),
            max_open_connections: self.max_open_connections,
            max_idle_connections: self.max_idle_connections,
        }
        .normalized()
    }
}

/// Readiness retry settings; missing values use the library defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub max_elapsed_seconds: Option<u64>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl RetrySection {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        if let Some(seconds) = self.max_elapsed_seconds {
            policy = policy.with_max_elapsed(Duration::from_secs(seconds));
        }
        if let Some(ms) = self.initial_delay_ms {
            policy = policy.with_initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        policy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend name; derived from the connector when unset
    pub driver: Option<String>,
    pub connector: Option<ConnectorConfig>,
    pub pool: PoolSection,
    pub retry: RetrySection,
    pub migrations: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: None,
            connector: None,
            pool: PoolSection::default(),
            retry: RetrySection::default(),
            migrations: PathBuf::from("migrations"),
        }
    }
}

impl Config {
    /// Read a config file; a missing file yields the defaults only when `optional`
    pub fn load(path: &Path, optional: bool) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(source) => Self::parse(path, &source),
            Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(path: &Path, source: &str) -> Result<Self, ConfigError> {
        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(source).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(source).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Replace the configured connector with a raw DSN
    pub fn with_database_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|url| !url.is_empty()) {
            self.connector = Some(ConnectorConfig::Raw(Raw::new(url)));
        }
        self
    }

    pub fn connector(&self) -> Result<&ConnectorConfig, ConfigError> {
        self.connector.as_ref().ok_or(ConfigError::MissingConnector)
    }

    pub fn driver(&self) -> Result<&str, ConfigError> {
        match &self.driver {
            Some(driver) => Ok(driver),
            None => Ok(self.connector()?.driver()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbkit::Connector;

    const YAML: &str = "
connector:
  kind: cockroach
  user: root
  host: 127.0.0.1
  port: 26257
  database: defaultdb
  parameters:
    mode: verify-full
pool:
  max_open_connections: 5
retry:
  max_attempts: 3
  initial_delay_ms: 10
migrations: db/migrations
";

    #[test]
    fn test_parse_yaml() {
        let config = Config::parse(Path::new("dbkit.yaml"), YAML).unwrap();
        assert_eq!(config.driver().unwrap(), "cockroach");
        assert_eq!(config.migrations, PathBuf::from("db/migrations"));
        assert_eq!(
            config.connector().unwrap().dsn().unwrap(),
            "postgres://root@127.0.0.1:26257/defaultdb?sslmode=verify-full"
        );

        let pool = config.pool.to_pool_config();
        assert_eq!(pool.max_open_connections, 5);
        assert_eq!(pool.max_idle_connections, 50);
        assert_eq!(pool.max_lifetime, Duration::from_secs(60));

        let retry = config.retry.to_retry_policy();
        assert_eq!(retry.max_attempts, Some(3));
        assert_eq!(retry.initial_delay, Duration::from_millis(10));
        assert_eq!(retry.max_elapsed, RetryPolicy::default().max_elapsed);
    }

    #[test]
    fn test_parse_json() {
        let source = r#"{"driver": "postgres", "connector": {"kind": "raw", "dsn": "postgres://localhost/app"}}"#;
        let config = Config::parse(Path::new("dbkit.json"), source).unwrap();
        assert_eq!(config.driver().unwrap(), "postgres");
        assert_eq!(config.migrations, PathBuf::from("migrations"));
    }

    #[test]
    fn test_database_url_overrides_connector() {
        let config = Config::parse(Path::new("dbkit.yaml"), YAML)
            .unwrap()
            .with_database_url(Some("postgres://other/app".to_string()));
        assert_eq!(config.connector().unwrap().dsn().unwrap(), "postgres://other/app");
        assert_eq!(config.driver().unwrap(), "postgres");
    }

    #[test]
    fn test_missing_connector() {
        let config = Config::default();
        assert!(matches!(config.driver(), Err(ConfigError::MissingConnector)));
    }

    #[test]
    fn test_invalid_file() {
        let err = Config::parse(Path::new("dbkit.yaml"), "pool: [1, 2]").unwrap_err();
        assert!(err.to_string().starts_with("invalid configuration in dbkit.yaml"));
    }

    #[test]
    fn test_optional_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbkit.yaml");
        assert_eq!(Config::load(&path, true).unwrap(), Config::default());
        assert!(matches!(Config::load(&path, false), Err(ConfigError::Read { .. })));
    }
}

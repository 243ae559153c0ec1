//! Connector selection from configuration files
//!
//! ```yaml
//! kind: postgres
//! user: app
//! password: secret
//! host: localhost
//! port: 5432
//! database: app
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cockroach::CockroachDb;
use crate::error::ConnectorResult;
use crate::postgres::PostgresDb;
use crate::raw::Raw;

/// Any supported connector, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectorConfig {
    Postgres(PostgresDb),
    Cockroach(CockroachDb),
    Raw(Raw),
}

impl ConnectorConfig {
    pub fn from_yaml(source: &str) -> ConnectorResult<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json(source: &str) -> ConnectorResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Parse by file extension: `.json` as JSON, anything else as YAML
    pub fn from_source(path: &Path, source: &str) -> ConnectorResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(source),
            _ => Self::from_yaml(source),
        }
    }

    /// Driver name understood by `dbkit::backends::backend_for`
    pub fn driver(&self) -> &'static str {
        match self {
            ConnectorConfig::Postgres(_) | ConnectorConfig::Raw(_) => "postgres",
            ConnectorConfig::Cockroach(_) => "cockroach",
        }
    }
}

impl dbkit::Connector for ConnectorConfig {
    fn dsn(&self) -> dbkit::DbResult<String> {
        match self {
            ConnectorConfig::Postgres(c) => c.dsn(),
            ConnectorConfig::Cockroach(c) => c.dsn(),
            ConnectorConfig::Raw(c) => c.dsn(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbkit::Connector;

    #[test]
    fn test_tagged_yaml() {
        let config = ConnectorConfig::from_yaml("kind: raw\ndsn: postgres://localhost/app\n").unwrap();
        assert_eq!(config, ConnectorConfig::Raw(Raw::new("postgres://localhost/app")));
        assert_eq!(config.dsn().unwrap(), "postgres://localhost/app");
    }

    #[test]
    fn test_tagged_json() {
        let config = ConnectorConfig::from_source(
            Path::new("db.json"),
            r#"{"kind": "postgres", "user": "app", "password": "pw", "host": "db", "port": 5432, "database": "app"}"#,
        )
        .unwrap();
        assert_eq!(config.driver(), "postgres");
        assert_eq!(config.dsn().unwrap(), "postgres://app:pw@db:5432/app");
    }

    #[test]
    fn test_connector_errors_map_to_db_errors() {
        let config = ConnectorConfig::Postgres(PostgresDb {
            host: "bad host".to_string(),
            ..Default::default()
        });
        let err = config.dsn().unwrap_err();
        assert_eq!(err.kind(), dbkit::ErrorKind::Configuration);
        assert!(err.to_string().starts_with("connector: invalid connection url"));
    }

    #[test]
    fn test_unknown_kind() {
        assert!(ConnectorConfig::from_yaml("kind: oracle\n").is_err());
    }
}

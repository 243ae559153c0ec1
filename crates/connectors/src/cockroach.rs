//! CockroachDB connector
//!
//! Same URL layout as PostgreSQL, plus an `options` parameter carrying the
//! cluster routing id and one session variable.

use serde::{Deserialize, Serialize};

use crate::dsn::postgres_url;
use crate::error::ConnectorResult;
use crate::postgres::PostgresDbParameters;
use crate::ssl::SslMode;

/// Session variable set through `options=-c name=value`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockroachDbVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockroachDbOptions {
    /// Routing id of a serverless cluster
    pub cluster: String,
    pub variable: CockroachDbVariable,
}

impl CockroachDbOptions {
    /// Value of the `options` URL parameter, empty when nothing is set
    pub fn to_param(&self) -> String {
        let mut parts = Vec::new();
        if !self.cluster.is_empty() {
            parts.push(format!("--cluster={}", self.cluster));
        }
        if !self.variable.name.is_empty() {
            parts.push(format!("-c {}={}", self.variable.name, self.variable.value));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockroachDbParameters {
    pub application_name: String,
    pub mode: Option<SslMode>,
    pub ssl_root_cert: String,
    pub ssl_cert: String,
    pub ssl_key: String,
    pub options: Option<CockroachDbOptions>,
}

/// CockroachDB connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockroachDb {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub parameters: Option<CockroachDbParameters>,
}

impl CockroachDb {
    pub fn to_dsn(&self) -> ConnectorResult<String> {
        let query = match &self.parameters {
            Some(parameters) => {
                let mut query = PostgresDbParameters {
                    application_name: parameters.application_name.clone(),
                    mode: parameters.mode,
                    ssl_root_cert: parameters.ssl_root_cert.clone(),
                    ssl_cert: parameters.ssl_cert.clone(),
                    ssl_key: parameters.ssl_key.clone(),
                }
                .to_query();
                if let Some(options) = &parameters.options {
                    query.insert("options", options.to_param());
                }
                query
            }
            None => Default::default(),
        };
        postgres_url(&self.user, &self.password, &self.host, self.port, &self.database, &query)
    }
}

impl dbkit::Connector for CockroachDb {
    fn dsn(&self) -> dbkit::DbResult<String> {
        Ok(self.to_dsn()?)
    }
}

//! # dbkit-connectors
//!
//! Connection descriptor builders for dbkit. Each connector deserializes from
//! YAML or JSON configuration and implements [`dbkit::Connector`].

pub mod cockroach;
pub mod config;
pub mod error;
pub mod postgres;
pub mod raw;
pub mod ssl;

mod dsn;

pub use cockroach::{CockroachDb, CockroachDbOptions, CockroachDbParameters, CockroachDbVariable};
pub use config::ConnectorConfig;
pub use error::{ConnectorError, ConnectorResult};
pub use postgres::{PostgresDb, PostgresDbParameters};
pub use raw::Raw;
pub use ssl::SslMode;

//! Connector errors

use thiserror::Error;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("invalid connection url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("cannot set {0} on connection url")]
    UrlComponent(&'static str),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ConnectorError> for dbkit::DbError {
    fn from(err: ConnectorError) -> Self {
        dbkit::DbError::Connector(err.to_string())
    }
}

//! Error types for dbkit
//!
//! Every fallible operation returns [`DbError`]. Each error reports an
//! [`ErrorKind`]; the transactional wrapper compares that kind against its
//! [`ErrorPolicy`](crate::transaction::ErrorPolicy) to tell expected runtime
//! failures apart from integrity faults.

use std::path::PathBuf;

use crate::migrations::Command;

/// Result type alias for dbkit operations
pub type DbResult<T> = Result<T, DbError>;

/// Coarse classification of a [`DbError`], looked through any wrapping context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Error reported by the database server or the driver's transport
    Driver,
    /// Query expected a row and found none
    NoRows,
    /// Operation was cancelled (pool shut down, caller gave up)
    Cancelled,
    /// Operation ran past its deadline
    DeadlineExceeded,
    /// Error raised by caller code, identified by its code
    Application,
    /// Misuse of the driver API: decoding, missing columns, bad configuration
    Internal,
    /// Migration file could not be loaded
    Migration,
    /// Database never became ready
    Connect,
    /// Unknown migration command
    Command,
    /// Filesystem error
    Io,
    /// Invalid configuration or connection descriptor
    Configuration,
    /// Unexpected error escalated by the transactional wrapper
    IntegrityViolation,
}

/// Error type for all dbkit operations
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("invalid migration ext: {}", .path.display())]
    InvalidMigrationExt { path: PathBuf },

    #[error("invalid migration name: {name}")]
    InvalidMigrationName { name: String },

    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateMigration {
        version: u32,
        first: String,
        second: String,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("connector: {0}")]
    Connector(String),

    #[error("connect failed after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("{direction} migration {version} ({name}): {source}")]
    Script {
        direction: Command,
        version: u32,
        name: String,
        #[source]
        source: Box<DbError>,
    },

    /// The original error followed by the error raised while rolling back
    #[error("{source}: {rollback}")]
    Rollback {
        #[source]
        source: Box<DbError>,
        rollback: Box<DbError>,
    },

    #[error("{operation}: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("integrity violation in {operation}: {source}")]
    IntegrityViolation {
        operation: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("database error: {message}")]
    Driver {
        code: Option<String>,
        message: String,
    },

    #[error("no rows in result set")]
    NoRows,

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{message}")]
    Application { code: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DbError {
    /// Build a caller-defined error; `code` is what an
    /// [`ErrorPolicy`](crate::transaction::ErrorPolicy) passthrough matches on.
    pub fn application(code: impl Into<String>, message: impl Into<String>) -> Self {
        DbError::Application {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a driver-level error, mostly useful for backends and tests
    pub fn driver(message: impl Into<String>) -> Self {
        DbError::Driver {
            code: None,
            message: message.into(),
        }
    }

    /// Annotate the error with the name of the operation that produced it
    pub fn context(self, operation: impl Into<String>) -> Self {
        DbError::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Append the error of a failed rollback, keeping `self` as the cause
    pub fn with_rollback(self, rollback: DbError) -> Self {
        DbError::Rollback {
            source: Box::new(self),
            rollback: Box::new(rollback),
        }
    }

    /// The innermost error, looking through operation, script and rollback context
    pub fn root(&self) -> &DbError {
        match self {
            DbError::Operation { source, .. }
            | DbError::Script { source, .. }
            | DbError::Rollback { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classification of the root error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            DbError::InvalidMigrationExt { .. }
            | DbError::InvalidMigrationName { .. }
            | DbError::DuplicateMigration { .. } => ErrorKind::Migration,
            DbError::Io { .. } => ErrorKind::Io,
            DbError::UnknownCommand(_) => ErrorKind::Command,
            DbError::Connector(_) | DbError::Configuration(_) => ErrorKind::Configuration,
            DbError::Connect { .. } => ErrorKind::Connect,
            DbError::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            DbError::Driver { .. } => ErrorKind::Driver,
            DbError::NoRows => ErrorKind::NoRows,
            DbError::Cancelled(_) => ErrorKind::Cancelled,
            DbError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            DbError::Application { .. } => ErrorKind::Application,
            DbError::Internal(_) => ErrorKind::Internal,
            // root() never stops on a wrapper
            DbError::Operation { .. } | DbError::Script { .. } | DbError::Rollback { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Application error code of the root error, if any
    pub fn code(&self) -> Option<&str> {
        match self.root() {
            DbError::Application { code, .. } => Some(code),
            DbError::Driver { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the root error is a cancellation or a missed deadline
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Cancelled | ErrorKind::DeadlineExceeded
        )
    }

    pub fn is_no_rows(&self) -> bool {
        self.kind() == ErrorKind::NoRows
    }

    pub fn is_integrity_violation(&self) -> bool {
        self.kind() == ErrorKind::IntegrityViolation
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::Driver {
                code: db_err.code().map(|code| code.into_owned()),
                message: db_err.message().to_string(),
            },
            sqlx::Error::RowNotFound => DbError::NoRows,
            sqlx::Error::PoolClosed => DbError::Cancelled("pool closed".to_string()),
            err @ (sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed) => DbError::driver(err.to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for DbError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DbError::DeadlineExceeded
    }
}

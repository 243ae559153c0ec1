//! Transaction Options and Error Policy
//!
//! Options applied when a transaction begins, and the allow-list that decides
//! which errors a wrapped operation may return as ordinary values.

use std::collections::HashSet;

use crate::error::{DbError, ErrorKind};

/// Transaction isolation levels supported by PostgreSQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read Uncommitted - lowest isolation level
    ReadUncommitted,
    /// Read Committed - default PostgreSQL isolation level
    ReadCommitted,
    /// Repeatable Read - stronger consistency guarantees
    RepeatableRead,
    /// Serializable - highest isolation level
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for a single transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level; `None` keeps the server default
    pub isolation_level: Option<IsolationLevel>,
    /// Whether the transaction is read-only
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn serializable() -> Self {
        Self {
            isolation_level: Some(IsolationLevel::Serializable),
            ..Default::default()
        }
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// The `SET TRANSACTION` statement for these options, if any is needed
    pub fn set_transaction_sql(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation_level {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }

        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(", ")))
        }
    }
}

/// Allow-list of error kinds and application codes a wrapped operation may
/// return. Anything else is escalated as [`DbError::IntegrityViolation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    kinds: HashSet<ErrorKind>,
    codes: HashSet<String>,
}

impl Default for ErrorPolicy {
    /// Driver errors, missing rows, cancellation and deadlines
    fn default() -> Self {
        Self {
            kinds: [
                ErrorKind::Driver,
                ErrorKind::NoRows,
                ErrorKind::Cancelled,
                ErrorKind::DeadlineExceeded,
            ]
            .into_iter()
            .collect(),
            codes: HashSet::new(),
        }
    }
}

impl ErrorPolicy {
    /// A policy that allows nothing
    pub fn empty() -> Self {
        Self {
            kinds: HashSet::new(),
            codes: HashSet::new(),
        }
    }

    /// Allow an error kind. `Internal` and `IntegrityViolation` are never allowed.
    pub fn allow_kind(mut self, kind: ErrorKind) -> Self {
        if !matches!(kind, ErrorKind::Internal | ErrorKind::IntegrityViolation) {
            self.kinds.insert(kind);
        }
        self
    }

    /// Allow an application error code to pass through unchanged
    pub fn allow_code(mut self, code: impl Into<String>) -> Self {
        self.codes.insert(code.into());
        self
    }

    pub fn allow_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Whether the error may be returned as an ordinary value
    pub fn is_expected(&self, err: &DbError) -> bool {
        match err.kind() {
            ErrorKind::Internal | ErrorKind::IntegrityViolation => false,
            ErrorKind::Application => err.code().map_or(false, |code| self.codes.contains(code)),
            kind => self.kinds.contains(&kind),
        }
    }

    /// Annotate expected errors with the operation name; escalate the rest
    pub fn classify(&self, operation: &str, err: DbError) -> DbError {
        if err.is_integrity_violation() {
            return err;
        }
        if self.is_expected(&err) {
            return err.context(operation);
        }

        tracing::error!(operation = %operation, error = %err, "unexpected database error");
        DbError::IntegrityViolation {
            operation: operation.to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_set_transaction_sql() {
        assert_eq!(TransactionOptions::default().set_transaction_sql(), None);
        assert_eq!(
            TransactionOptions::read_only().set_transaction_sql().as_deref(),
            Some("SET TRANSACTION READ ONLY")
        );
        assert_eq!(
            TransactionOptions::read_only()
                .with_isolation_level(IsolationLevel::RepeatableRead)
                .set_transaction_sql()
                .as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        );
    }

    #[test]
    fn test_default_policy_allow_list() {
        let policy = ErrorPolicy::default();
        assert!(policy.is_expected(&DbError::driver("unique violation")));
        assert!(policy.is_expected(&DbError::NoRows.context("find")));
        assert!(policy.is_expected(&DbError::Cancelled("shutdown".to_string())));
        assert!(policy.is_expected(&DbError::DeadlineExceeded));
        assert!(!policy.is_expected(&DbError::Internal("bad column".to_string())));
        assert!(!policy.is_expected(&DbError::application("user_exists", "user exists")));
    }

    #[test]
    fn test_application_codes() {
        let policy = ErrorPolicy::default().allow_codes(["user_exists", "not_owner"]);
        assert!(policy.is_expected(&DbError::application("user_exists", "user exists")));
        assert!(policy.is_expected(&DbError::application("not_owner", "x").context("op")));
        assert!(!policy.is_expected(&DbError::application("quota", "over quota")));
    }

    #[test]
    fn test_internal_is_never_allowed() {
        let policy = ErrorPolicy::empty().allow_kind(ErrorKind::Internal);
        assert!(!policy.is_expected(&DbError::Internal("x".to_string())));
    }

    #[test]
    fn test_classify_annotates_expected_errors() {
        let err = ErrorPolicy::default().classify("find_user", DbError::NoRows);
        assert!(!err.is_integrity_violation());
        assert_eq!(err.to_string(), "find_user: no rows in result set");
    }

    #[test]
    fn test_classify_escalates_once() {
        let policy = ErrorPolicy::empty();
        let escalated = policy.classify("create_user", DbError::driver("boom"));
        assert!(escalated.is_integrity_violation());
        assert_eq!(
            escalated.to_string(),
            "integrity violation in create_user: database error: boom"
        );

        let again = policy.classify("outer", escalated);
        assert!(matches!(
            again,
            DbError::IntegrityViolation { ref operation, .. } if operation == "create_user"
        ));
    }
}

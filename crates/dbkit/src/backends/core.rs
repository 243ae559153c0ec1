//! Core Database Backend Traits
//!
//! These traits abstract the driver behind the migration runner and the
//! transactional wrapper. A backend opens a [`DatabasePool`]; the pool hands
//! out [`DatabaseTransaction`]s and executes statements directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::connection::PoolConfig;
use crate::error::{DbError, DbResult};
use crate::transaction::TransactionOptions;

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: Send + Sync {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    /// Execute a query and return all rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>>;

    /// Execute a query and return the first row, if any
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> DbResult<Option<DatabaseRow>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DbResult<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Abstract pooled database handle, shared by every caller
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction on a pooled connection
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement outside of any transaction
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    /// Execute a query outside of any transaction and return all rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>>;

    /// Execute a query outside of any transaction and return the first row
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> DbResult<Option<DatabaseRow>>;

    /// Liveness probe
    async fn ping(&self) -> DbResult<()>;

    /// Release every pooled connection. Closing twice is a no-op.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    fn stats(&self) -> DatabasePoolStats;
}

/// Database driver able to open pools from a connection descriptor
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Driver name, as accepted by [`backend_for`](super::backend_for)
    fn name(&self) -> &'static str;

    /// Create a pool without connecting; readiness is probed by the caller
    async fn open(&self, dsn: &str, config: &PoolConfig) -> DbResult<Arc<dyn DatabasePool>>;
}

/// Database pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
    pub max_connections: u32,
    pub max_idle_connections: u32,
}

/// A fetched row: column names paired with their values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> DbResult<&DatabaseValue> {
        self.values.get(index).ok_or_else(|| {
            DbError::Internal(format!(
                "column index {} out of bounds ({} columns)",
                index,
                self.values.len()
            ))
        })
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> DbResult<&DatabaseValue> {
        let index = self
            .columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| DbError::Internal(format!("column '{}' not found", name)))?;
        self.get_by_index(index)
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Convert row to a JSON object keyed by column name
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view of the value, widening 32-bit integers
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            DatabaseValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<u32> for DatabaseValue {
    fn from(value: u32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

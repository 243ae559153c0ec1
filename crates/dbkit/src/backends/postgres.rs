//! PostgreSQL Backend Implementation
//!
//! PostgreSQL (and wire-compatible CockroachDB) implementation of the backend
//! traits on top of sqlx.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Connection, Executor, Pool, Postgres, Row, TypeInfo, ValueRef};

use super::core::*;
use crate::connection::PoolConfig;
use crate::error::{DbError, DbResult};
use crate::transaction::TransactionOptions;

/// PostgreSQL database backend
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open(&self, dsn: &str, config: &PoolConfig) -> DbResult<Arc<dyn DatabasePool>> {
        let options = PgPoolOptions::new()
            .max_connections(config.max_open_connections)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.max_idle_time);

        // sqlx keeps no idle-count ceiling; idle connections are reaped by idle_timeout
        let pool = options.connect_lazy(dsn).map_err(|e| {
            DbError::Configuration(format!("invalid connection descriptor: {}", e))
        })?;

        tracing::debug!(
            max_connections = config.max_open_connections,
            max_lifetime = ?config.max_lifetime,
            idle_timeout = ?config.max_idle_time,
            "PostgreSQL pool created"
        );

        Ok(Arc::new(PostgresPool::new(pool, config.max_idle_connections)))
    }
}

/// PostgreSQL connection pool
pub struct PostgresPool {
    pool: Pool<Postgres>,
    max_idle_connections: u32,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>, max_idle_connections: u32) -> Self {
        Self {
            pool,
            max_idle_connections,
        }
    }

    /// The underlying sqlx pool, for callers that need the full driver API
    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn DatabaseTransaction>> {
        let mut tx = self.pool.begin().await?;

        if let Some(sql) = options.set_transaction_sql() {
            // Dropping the transaction on error rolls it back
            (&mut *tx).execute(sql.as_str()).await?;
            tracing::debug!("{}", sql);
        }

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let result = if params.is_empty() {
            // Simple query protocol: scripts may hold several statements
            (&self.pool).execute(sql).await?
        } else {
            bind_values(sqlx::query(sql), params)?
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        let rows = bind_values(sqlx::query(sql), params)?
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(convert_row).collect()
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> DbResult<Option<DatabaseRow>> {
        let row = bind_values(sqlx::query(sql), params)?
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(convert_row).transpose()
    }

    async fn ping(&self) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn stats(&self) -> DatabasePoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DatabasePoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
            max_connections: self.pool.options().get_max_connections(),
            max_idle_connections: self.max_idle_connections,
        }
    }
}

/// PostgreSQL transaction
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> DbResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Internal("transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let tx = self.active()?;
        let result = if params.is_empty() {
            (&mut **tx).execute(sql).await?
        } else {
            bind_values(sqlx::query(sql), params)?
                .execute(&mut **tx)
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        let tx = self.active()?;
        let rows = bind_values(sqlx::query(sql), params)?
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(convert_row).collect()
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> DbResult<Option<DatabaseRow>> {
        let tx = self.active()?;
        let row = bind_values(sqlx::query(sql), params)?
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(convert_row).transpose()
    }

    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        let tx = self.active_owned()?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DbResult<()> {
        let tx = self.active_owned()?;
        tx.rollback().await?;
        Ok(())
    }
}

impl PostgresTransaction {
    fn active_owned(&mut self) -> DbResult<sqlx::Transaction<'static, Postgres>> {
        self.tx
            .take()
            .ok_or_else(|| DbError::Internal("transaction already completed".to_string()))
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Bind dbkit values to a sqlx query
fn bind_values<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> DbResult<PgQuery<'q>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            DatabaseValue::Uuid(u) => query.bind(*u),
            DatabaseValue::DateTime(dt) => query.bind(*dt),
            DatabaseValue::Json(j) => query.bind(j.clone()),
        };
    }
    Ok(query)
}

fn convert_row(row: &PgRow) -> DbResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(postgres_value(row, index, column.type_info().name())?);
    }

    Ok(DatabaseRow::new(columns, values))
}

/// Convert a PostgreSQL column value to a DatabaseValue
fn postgres_value(row: &PgRow, index: usize, type_name: &str) -> DbResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let value = match type_name {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            DatabaseValue::DateTime(chrono::DateTime::from_naive_utc_and_offset(
                naive,
                chrono::Utc,
            ))
        }
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        _ => DatabaseValue::String(row.try_get(index)?),
    };

    Ok(value)
}

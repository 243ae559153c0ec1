//! In-memory backend for development and testing
//!
//! Simulates the migration version table and records every statement it is
//! given. Statements inside a transaction only become visible on commit.
//! Failures can be injected for statements, rollbacks, transaction starts and
//! liveness probes.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::core::*;
use crate::connection::PoolConfig;
use crate::error::{DbError, DbResult, ErrorKind};
use crate::migrations::runner::{
    CREATE_VERSION_TABLE, CURRENT_VERSION, DELETE_VERSION, INSERT_VERSION, SELECT_VERSIONS,
};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone)]
enum Effect {
    CreateTable,
    Insert(u32),
    Delete(u32),
    Script(String),
}

#[derive(Debug, Default)]
struct Inner {
    table_created: bool,
    versions: BTreeMap<u32, DateTime<Utc>>,
    executed: Vec<String>,
    committed: Vec<String>,
    fail_on: Vec<(String, ErrorKind)>,
    fail_rollbacks: bool,
    fail_begin: Option<ErrorKind>,
    failing_pings: u32,
    ping_error: Option<ErrorKind>,
    pings: u32,
    begun: Vec<TransactionOptions>,
    open_transactions: usize,
    commits: usize,
    rollbacks: usize,
    closed: bool,
    config: Option<PoolConfig>,
}

/// Shared state behind every pool and transaction of one memory database
#[derive(Debug, Default)]
pub struct MemoryState {
    inner: Mutex<Inner>,
}

fn injected(kind: ErrorKind, what: &str) -> DbError {
    match kind {
        ErrorKind::Driver => DbError::driver(format!("injected failure: {}", what)),
        ErrorKind::NoRows => DbError::NoRows,
        ErrorKind::Cancelled => DbError::Cancelled(format!("injected failure: {}", what)),
        ErrorKind::DeadlineExceeded => DbError::DeadlineExceeded,
        ErrorKind::Application => DbError::application("injected", format!("injected failure: {}", what)),
        _ => DbError::Internal(format!("injected failure: {}", what)),
    }
}

impl MemoryState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every statement containing `pattern` with a driver error
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.fail_on_with(pattern, ErrorKind::Driver);
    }

    /// Fail every statement containing `pattern` with an error of `kind`
    pub fn fail_on_with(&self, pattern: impl Into<String>, kind: ErrorKind) {
        self.inner.lock().fail_on.push((pattern.into(), kind));
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.inner.lock().fail_rollbacks = fail;
    }

    pub fn fail_begin(&self, kind: Option<ErrorKind>) {
        self.inner.lock().fail_begin = kind;
    }

    /// Fail the next `count` liveness probes with an error of `kind`
    pub fn fail_pings(&self, count: u32, kind: ErrorKind) {
        let mut inner = self.inner.lock();
        inner.failing_pings = count;
        inner.ping_error = Some(kind);
    }

    /// Mark versions as applied without running anything
    pub fn seed_versions(&self, versions: impl IntoIterator<Item = u32>) {
        let mut inner = self.inner.lock();
        inner.table_created = true;
        let now = Utc::now();
        inner.versions.extend(versions.into_iter().map(|v| (v, now)));
    }

    pub fn versions(&self) -> Vec<u32> {
        self.inner.lock().versions.keys().copied().collect()
    }

    pub fn table_created(&self) -> bool {
        self.inner.lock().table_created
    }

    /// Every statement issued, committed or not
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    /// Committed statements, in commit order
    pub fn committed(&self) -> Vec<String> {
        self.inner.lock().committed.clone()
    }

    /// Committed statements other than version-table bookkeeping
    pub fn committed_scripts(&self) -> Vec<String> {
        self.inner
            .lock()
            .committed
            .iter()
            .filter(|sql| ![CREATE_VERSION_TABLE, INSERT_VERSION, DELETE_VERSION].contains(&sql.as_str()))
            .cloned()
            .collect()
    }

    pub fn count_committed(&self, sql: &str) -> usize {
        self.inner.lock().committed.iter().filter(|s| *s == sql).count()
    }

    /// Options of every transaction begun so far
    pub fn begun(&self) -> Vec<TransactionOptions> {
        self.inner.lock().begun.clone()
    }

    pub fn open_transactions(&self) -> usize {
        self.inner.lock().open_transactions
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.lock().rollbacks
    }

    pub fn ping_count(&self) -> u32 {
        self.inner.lock().pings
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Validate a statement and work out what it would change
    fn prepare(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Effect> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DbError::Cancelled("pool closed".to_string()));
        }
        inner.executed.push(sql.to_string());

        if let Some((pattern, kind)) = inner.fail_on.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(injected(*kind, pattern));
        }

        match sql {
            CREATE_VERSION_TABLE => Ok(Effect::CreateTable),
            INSERT_VERSION | DELETE_VERSION => {
                if !inner.table_created {
                    return Err(missing_table());
                }
                let version = params
                    .first()
                    .and_then(DatabaseValue::as_i64)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| DbError::driver("invalid input syntax for type integer"))?;

                if sql == INSERT_VERSION {
                    if inner.versions.contains_key(&version) {
                        return Err(DbError::Driver {
                            code: Some("23505".to_string()),
                            message: "duplicate key value violates unique constraint".to_string(),
                        });
                    }
                    Ok(Effect::Insert(version))
                } else {
                    Ok(Effect::Delete(version))
                }
            }
            _ => Ok(Effect::Script(sql.to_string())),
        }
    }

    fn apply(&self, effects: Vec<Effect>) -> u64 {
        let mut inner = self.inner.lock();
        let mut affected = 0;
        for effect in effects {
            let sql = match effect {
                Effect::CreateTable => {
                    inner.table_created = true;
                    CREATE_VERSION_TABLE.to_string()
                }
                Effect::Insert(version) => {
                    inner.versions.insert(version, Utc::now());
                    affected += 1;
                    INSERT_VERSION.to_string()
                }
                Effect::Delete(version) => {
                    if inner.versions.remove(&version).is_some() {
                        affected += 1;
                    }
                    DELETE_VERSION.to_string()
                }
                Effect::Script(sql) => sql,
            };
            inner.committed.push(sql);
        }
        affected
    }

    fn query(&self, sql: &str) -> DbResult<Vec<DatabaseRow>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DbError::Cancelled("pool closed".to_string()));
        }
        inner.executed.push(sql.to_string());

        if let Some((pattern, kind)) = inner.fail_on.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(injected(*kind, pattern));
        }

        match sql {
            CURRENT_VERSION | SELECT_VERSIONS if !inner.table_created => Err(missing_table()),
            CURRENT_VERSION => Ok(inner
                .versions
                .keys()
                .next_back()
                .map(|&v| version_row(v, None))
                .into_iter()
                .collect()),
            SELECT_VERSIONS => Ok(inner
                .versions
                .iter()
                .map(|(&v, &time)| version_row(v, Some(time)))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn begin(&self, options: &TransactionOptions) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DbError::Cancelled("pool closed".to_string()));
        }
        if let Some(kind) = inner.fail_begin {
            return Err(injected(kind, "begin"));
        }
        inner.begun.push(*options);
        inner.open_transactions += 1;
        Ok(())
    }

    fn finish(&self, committed: bool) {
        let mut inner = self.inner.lock();
        inner.open_transactions = inner.open_transactions.saturating_sub(1);
        if committed {
            inner.commits += 1;
        } else {
            inner.rollbacks += 1;
        }
    }
}

fn missing_table() -> DbError {
    DbError::Driver {
        code: Some("42P01".to_string()),
        message: "relation \"migration\" does not exist".to_string(),
    }
}

fn version_row(version: u32, time: Option<DateTime<Utc>>) -> DatabaseRow {
    let mut columns = vec!["version".to_string()];
    let mut values = vec![DatabaseValue::Int32(version as i32)];
    if let Some(time) = time {
        columns.push("time".to_string());
        values.push(DatabaseValue::DateTime(time));
    }
    DatabaseRow::new(columns, values)
}

/// In-memory database backend; every pool it opens shares one state
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide backend behind the `memory` driver name
    pub fn shared() -> Self {
        static SHARED: OnceLock<MemoryBackend> = OnceLock::new();
        SHARED.get_or_init(MemoryBackend::new).clone()
    }

    pub fn state(&self) -> Arc<MemoryState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl DatabaseBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, dsn: &str, config: &PoolConfig) -> DbResult<Arc<dyn DatabasePool>> {
        if dsn.is_empty() {
            return Err(DbError::Configuration("empty connection descriptor".to_string()));
        }
        {
            let mut inner = self.state.inner.lock();
            inner.closed = false;
            inner.config = Some(config.clone());
        }
        Ok(Arc::new(MemoryPool::with_state(Arc::clone(&self.state))))
    }
}

/// In-memory pool
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    state: Arc<MemoryState>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: Arc<MemoryState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<MemoryState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl DatabasePool for MemoryPool {
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn DatabaseTransaction>> {
        self.state.begin(options)?;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            finished: false,
        }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let effect = self.state.prepare(sql, params)?;
        Ok(self.state.apply(vec![effect]))
    }

    async fn fetch_all(&self, sql: &str, _params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        self.state.query(sql)
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        _params: &[DatabaseValue],
    ) -> DbResult<Option<DatabaseRow>> {
        Ok(self.state.query(sql)?.into_iter().next())
    }

    async fn ping(&self) -> DbResult<()> {
        let mut inner = self.state.inner.lock();
        inner.pings += 1;
        if inner.closed {
            return Err(DbError::Cancelled("pool closed".to_string()));
        }
        if inner.failing_pings > 0 {
            inner.failing_pings -= 1;
            let kind = inner.ping_error.unwrap_or(ErrorKind::Driver);
            return Err(injected(kind, "ping"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.inner.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn stats(&self) -> DatabasePoolStats {
        let inner = self.state.inner.lock();
        let config = inner.config.clone().unwrap_or_default();
        let active = inner.open_transactions as u32;
        DatabasePoolStats {
            total_connections: active,
            idle_connections: 0,
            active_connections: active,
            max_connections: config.max_open_connections,
            max_idle_connections: config.max_idle_connections,
        }
    }
}

/// In-memory transaction; buffered effects apply on commit
pub struct MemoryTransaction {
    state: Arc<MemoryState>,
    pending: Vec<Effect>,
    finished: bool,
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let effect = self.state.prepare(sql, params)?;
        let affected = matches!(effect, Effect::Insert(_) | Effect::Delete(_)) as u64;
        self.pending.push(effect);
        Ok(affected)
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        self.state.query(sql)
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        _params: &[DatabaseValue],
    ) -> DbResult<Option<DatabaseRow>> {
        Ok(self.state.query(sql)?.into_iter().next())
    }

    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        self.finished = true;
        let pending = std::mem::take(&mut self.pending);
        self.state.apply(pending);
        self.state.finish(true);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DbResult<()> {
        self.finished = true;
        self.pending.clear();
        self.state.finish(false);
        if self.state.inner.lock().fail_rollbacks {
            return Err(DbError::driver("rollback failed: connection reset"));
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("memory transaction dropped without commit or rollback");
            self.state.finish(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transaction_effects_apply_on_commit() {
        let pool = MemoryPool::new();
        pool.execute(CREATE_VERSION_TABLE, &[]).await.unwrap();

        let mut tx = pool.begin(&TransactionOptions::default()).await.unwrap();
        tx.execute(INSERT_VERSION, &[DatabaseValue::Int32(1)]).await.unwrap();
        assert!(pool.state().versions().is_empty());
        assert_eq!(pool.state().open_transactions(), 1);
        tx.commit().await.unwrap();

        assert_eq!(pool.state().versions(), vec![1]);
        assert_eq!(pool.state().open_transactions(), 0);
        let row = pool.fetch_optional(CURRENT_VERSION, &[]).await.unwrap().unwrap();
        assert_eq!(row.get_by_name("version").unwrap().as_i64(), Some(1));
    }

    #[tokio::test]
    async fn test_dropped_transaction_counts_as_rollback() {
        let pool = MemoryPool::new();
        {
            let mut tx = pool.begin(&TransactionOptions::read_only()).await.unwrap();
            tx.execute("select 1", &[]).await.unwrap();
        }
        assert_eq!(pool.state().open_transactions(), 0);
        assert_eq!(pool.state().rollbacks(), 1);
        assert!(pool.state().begun()[0].read_only);
        assert!(pool.state().committed().is_empty());
    }

    #[tokio::test]
    async fn test_version_table_must_exist() {
        let pool = MemoryPool::new();
        let err = pool.fetch_optional(CURRENT_VERSION, &[]).await.unwrap_err();
        assert_eq!(err.code(), Some("42P01"));
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = MemoryPool::new();
        pool.close().await;
        pool.close().await;
        assert!(pool.is_closed());
        assert!(pool.ping().await.unwrap_err().is_cancellation());
        assert!(pool.execute("select 1", &[]).await.is_err());
    }

    #[test]
    fn test_shared_backend_is_process_wide() {
        let first = MemoryBackend::shared();
        let second = MemoryBackend::shared();
        assert!(Arc::ptr_eq(&first.state(), &second.state()));
        assert!(!Arc::ptr_eq(&first.state(), &MemoryBackend::new().state()));
    }
}

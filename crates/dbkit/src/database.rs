//! Database handle
//!
//! [`Database`] owns the shared pool and runs caller operations with or without
//! a transaction. Every call is timed by the configured [`MetricCollector`] and
//! its error, if any, is checked against the [`ErrorPolicy`]: expected errors
//! come back annotated with the operation name, anything else is escalated as
//! [`DbError::IntegrityViolation`](crate::DbError::IntegrityViolation).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::backends::{DatabaseBackend, DatabasePool, DatabasePoolStats, DatabaseTransaction};
use crate::connection::{open_pool, PoolConfig, RetryPolicy};
use crate::connector::Connector;
use crate::error::DbResult;
use crate::metrics::{collecting, MetricCollector, TracingMetrics};
use crate::migrations::{Command, MigrationSet, RunReport};
use crate::transaction::{ErrorPolicy, TransactionOptions};

/// Shared database handle
#[derive(Clone)]
pub struct Database {
    pool: Arc<dyn DatabasePool>,
    policy: Arc<ErrorPolicy>,
    metrics: Arc<dyn MetricCollector>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("stats", &self.pool.stats())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Database {
    /// Wrap an already opened pool
    pub fn new(pool: Arc<dyn DatabasePool>) -> Self {
        Self {
            pool,
            policy: Arc::new(ErrorPolicy::default()),
            metrics: Arc::new(TracingMetrics),
        }
    }

    /// Open a pool from `connector` and wait until the database answers
    pub async fn open(
        backend: &dyn DatabaseBackend,
        connector: &dyn Connector,
        config: &PoolConfig,
        retry: &RetryPolicy,
    ) -> DbResult<Self> {
        let pool = open_pool(backend, connector, config, retry).await?;
        Ok(Self::new(pool))
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn pool(&self) -> &dyn DatabasePool {
        self.pool.as_ref()
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub fn stats(&self) -> DatabasePoolStats {
        self.pool.stats()
    }

    /// Run `op` directly against the pool
    pub async fn without_transaction<T, F>(&self, operation: &str, op: F) -> DbResult<T>
    where
        T: Send,
        F: for<'p> FnOnce(&'p dyn DatabasePool) -> BoxFuture<'p, DbResult<T>> + Send,
    {
        collecting(self.metrics.as_ref(), operation, op(self.pool.as_ref()))
            .await
            .map_err(|e| self.policy.classify(operation, e))
    }

    /// Run `op` inside a transaction: commit on success, roll back on error or
    /// panic. A failed rollback is appended to the original error.
    pub async fn with_transaction<T, F>(
        &self,
        operation: &str,
        options: TransactionOptions,
        op: F,
    ) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn DatabaseTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        collecting(
            self.metrics.as_ref(),
            operation,
            self.run_in_transaction(operation, options, op),
        )
        .await
        .map_err(|e| self.policy.classify(operation, e))
    }

    async fn run_in_transaction<T, F>(
        &self,
        operation: &str,
        options: TransactionOptions,
        op: F,
    ) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn DatabaseTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        let mut tx = self.pool.begin(&options).await?;
        tracing::debug!(operation, ?options, "transaction started");

        let outcome = AssertUnwindSafe(op(&mut *tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                tx.commit().await?;
                tracing::debug!(operation, "transaction committed");
                Ok(value)
            }
            Ok(Err(err)) => match tx.rollback().await {
                Ok(()) => {
                    tracing::debug!(operation, error = %err, "transaction rolled back");
                    Err(err)
                }
                Err(rollback) => {
                    tracing::error!(operation, error = %rollback, "transaction rollback failed");
                    Err(err.with_rollback(rollback))
                }
            },
            Err(panic) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(operation, error = %rollback, "rollback after panic failed");
                } else {
                    tracing::debug!(operation, "transaction rolled back after panic");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Apply or roll back `migrations` on this database
    pub async fn migrate(&self, command: Command, migrations: &MigrationSet) -> DbResult<RunReport> {
        crate::migrations::run(self.pool.as_ref(), command, migrations).await
    }

    /// Release every pooled connection. Closing twice is a no-op.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::debug!("database closed");
        }
    }
}

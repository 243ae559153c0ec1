//! Migration Runner - Executes migrations against the database
//!
//! Each migration runs in its own transaction together with the write to the
//! version table. A run has no outer transaction: when a migration fails, the
//! ones executed before it in the same run stay applied.
//!
//! Running two migrations concurrently against one database is not supported.

use std::time::Instant;

use super::definitions::{Command, Migration, MigrationSet, MigrationStatus, RunReport, VersionRecord};
use crate::backends::{DatabaseBackend, DatabasePool, DatabaseRow, DatabaseValue};
use crate::connection::{open_pool, PoolConfig, RetryPolicy};
use crate::connector::Connector;
use crate::error::{DbError, DbResult};
use crate::transaction::TransactionOptions;

/// Version table DDL
pub const CREATE_VERSION_TABLE: &str = "create table if not exists migration
(
    version integer         \t\tnot null,
    time    timestamp default now() not null,
    unique (version),
    primary key (version)
);";

pub const INSERT_VERSION: &str = "insert into migration (version) values ($1)";
pub const DELETE_VERSION: &str = "delete from migration where version = $1";
pub const CURRENT_VERSION: &str = "SELECT version FROM migration ORDER BY version DESC LIMIT 1";
pub const SELECT_VERSIONS: &str = "SELECT version, time FROM migration ORDER BY version";

/// Migration runner bound to a pool
pub struct MigrationRunner<'p> {
    pool: &'p dyn DatabasePool,
}

impl<'p> MigrationRunner<'p> {
    pub fn new(pool: &'p dyn DatabasePool) -> Self {
        Self { pool }
    }

    /// Create the version table if it does not exist
    pub async fn ensure_version_table(&self) -> DbResult<()> {
        self.pool.execute(CREATE_VERSION_TABLE, &[]).await?;
        Ok(())
    }

    /// Highest applied version, zero when nothing is applied
    pub async fn current_version(&self) -> DbResult<u32> {
        self.ensure_version_table().await?;
        self.query_current_version().await
    }

    async fn query_current_version(&self) -> DbResult<u32> {
        match self.pool.fetch_optional(CURRENT_VERSION, &[]).await? {
            Some(row) => version_of(&row),
            None => Ok(0),
        }
    }

    /// Every row of the version table, ascending
    pub async fn applied_versions(&self) -> DbResult<Vec<VersionRecord>> {
        self.ensure_version_table().await?;
        let rows = self.pool.fetch_all(SELECT_VERSIONS, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(VersionRecord {
                    version: version_of(row)?,
                    applied_at: row.get_by_name("time")?.as_datetime(),
                })
            })
            .collect()
    }

    /// Applied state of every migration in `migrations`
    pub async fn status(&self, migrations: &MigrationSet) -> DbResult<Vec<MigrationStatus>> {
        let applied = self.applied_versions().await?;

        Ok(migrations
            .ascending()
            .map(|migration| {
                let record = applied.iter().find(|r| r.version == migration.version);
                MigrationStatus {
                    version: migration.version,
                    name: migration.name.clone(),
                    applied: record.is_some(),
                    applied_at: record.and_then(|r| r.applied_at),
                }
            })
            .collect())
    }

    /// Apply pending migrations ascending, or roll back applied ones descending.
    /// Stops at the first failure.
    pub async fn run(&self, command: Command, migrations: &MigrationSet) -> DbResult<RunReport> {
        let start = Instant::now();
        let from_version = self.current_version().await?;

        let selected: Vec<&Migration> = match command {
            Command::Apply => migrations.pending(from_version).collect(),
            Command::Rollback => migrations.applied(from_version).collect(),
        };

        tracing::debug!(
            command = %command,
            current = from_version,
            count = selected.len(),
            "running migrations"
        );

        let mut executed = Vec::with_capacity(selected.len());
        for migration in selected {
            self.step(command, migration)
                .await
                .map_err(|e| DbError::Script {
                    direction: command,
                    version: migration.version,
                    name: migration.name.clone(),
                    source: Box::new(e),
                })?;

            tracing::info!(
                command = %command,
                version = migration.version,
                name = %migration.name,
                "migration executed"
            );
            executed.push(migration.version);
        }

        Ok(RunReport {
            command,
            from_version,
            to_version: self.query_current_version().await?,
            executed,
            elapsed: start.elapsed(),
        })
    }

    /// One migration and its version-row write, in one transaction
    async fn step(&self, command: Command, migration: &Migration) -> DbResult<()> {
        let (script, record) = match command {
            Command::Apply => (&migration.up, INSERT_VERSION),
            Command::Rollback => (&migration.down, DELETE_VERSION),
        };
        let version = i32::try_from(migration.version).map_err(|_| {
            DbError::Internal(format!("version {} out of range", migration.version))
        })?;

        let mut tx = self.pool.begin(&TransactionOptions::default()).await?;

        let result = async {
            if !script.trim().is_empty() {
                tx.execute(script, &[]).await?;
            }
            tx.execute(record, &[DatabaseValue::Int32(version)]).await?;
            Ok::<_, DbError>(())
        }
        .await;

        match result {
            Ok(()) => tx.commit().await,
            Err(e) => match tx.rollback().await {
                Ok(()) => Err(e),
                Err(rollback) => {
                    tracing::error!(version, error = %rollback, "migration rollback failed");
                    Err(e.with_rollback(rollback))
                }
            },
        }
    }
}

fn version_of(row: &DatabaseRow) -> DbResult<u32> {
    let value = row.get_by_index(0)?;
    value
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| DbError::Internal(format!("invalid migration version: {:?}", value)))
}

/// Run `command` against an already opened pool
pub async fn run(
    pool: &dyn DatabasePool,
    command: Command,
    migrations: &MigrationSet,
) -> DbResult<RunReport> {
    MigrationRunner::new(pool).run(command, migrations).await
}

/// Open a pool, run `command`, and close the pool again
pub async fn migrate(
    backend: &dyn DatabaseBackend,
    connector: &dyn Connector,
    retry: &RetryPolicy,
    command: Command,
    migrations: &MigrationSet,
) -> DbResult<RunReport> {
    let pool = open_pool(backend, connector, &PoolConfig::default(), retry).await?;
    let result = run(pool.as_ref(), command, migrations).await;
    pool.close().await;
    result
}

//! Connection Pool Management
//!
//! Opens a pooled handle from a connector-supplied descriptor and waits for the
//! database to answer a liveness probe before handing it out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::retry::RetryPolicy;
use crate::backends::{DatabaseBackend, DatabasePool};
use crate::connector::Connector;
use crate::error::{DbError, DbResult};

const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(60);
const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(10);
const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 50;
const DEFAULT_MAX_IDLE_CONNECTIONS: u32 = 50;

/// Pool tuning parameters. Zero values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_lifetime: Duration,
    pub max_idle_time: Duration,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_lifetime: DEFAULT_MAX_LIFETIME,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
        }
    }
}

impl PoolConfig {
    /// Replace every zero value with its default
    pub fn normalized(&self) -> Self {
        fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
            if value == T::default() {
                default
            } else {
                value
            }
        }

        Self {
            max_lifetime: or_default(self.max_lifetime, DEFAULT_MAX_LIFETIME),
            max_idle_time: or_default(self.max_idle_time, DEFAULT_MAX_IDLE_TIME),
            max_open_connections: or_default(self.max_open_connections, DEFAULT_MAX_OPEN_CONNECTIONS),
            max_idle_connections: or_default(self.max_idle_connections, DEFAULT_MAX_IDLE_CONNECTIONS),
        }
    }
}

/// Open a pool and block until it answers a liveness probe.
///
/// Cancellation- and deadline-class probe failures abort immediately; other
/// failures are retried according to `retry`.
pub async fn open_pool(
    backend: &dyn DatabaseBackend,
    connector: &dyn Connector,
    config: &PoolConfig,
    retry: &RetryPolicy,
) -> DbResult<Arc<dyn DatabasePool>> {
    let dsn = connector.dsn().map_err(|e| match e {
        DbError::Connector(_) => e,
        other => DbError::Connector(other.to_string()),
    })?;

    let config = config.normalized();
    let pool = backend.open(&dsn, &config).await?;

    if let Err(e) = wait_ready(pool.as_ref(), retry).await {
        pool.close().await;
        return Err(e);
    }

    tracing::debug!(backend = backend.name(), "database ready");
    Ok(pool)
}

/// Probe the pool until it answers, backing off between failures
pub async fn wait_ready(pool: &dyn DatabasePool, retry: &RetryPolicy) -> DbResult<()> {
    let deadline = retry.max_elapsed.map(|elapsed| Instant::now() + elapsed);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let probe = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, pool.ping())
                .await
                .unwrap_or(Err(DbError::DeadlineExceeded)),
            None => pool.ping().await,
        };

        let err = match probe {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if err.is_cancellation() {
            tracing::error!(attempts, error = %err, "database readiness probe aborted");
            return Err(DbError::Connect {
                attempts,
                source: Box::new(err),
            });
        }

        let delay = match retry.delay_for_attempt(attempts) {
            Some(delay) => delay,
            None => {
                return Err(DbError::Connect {
                    attempts,
                    source: Box::new(err),
                })
            }
        };

        if let Some(deadline) = deadline {
            if Instant::now() + delay >= deadline {
                return Err(DbError::Connect {
                    attempts,
                    source: Box::new(err),
                });
            }
        }

        tracing::warn!(attempts, ?delay, error = %err, "database not ready, retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use crate::error::ErrorKind;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_attempts(5)
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_lifetime, Duration::from_secs(60));
        assert_eq!(config.max_idle_time, Duration::from_secs(10));
        assert_eq!(config.max_open_connections, 50);
        assert_eq!(config.max_idle_connections, 50);
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = PoolConfig {
            max_lifetime: Duration::ZERO,
            max_idle_time: Duration::from_secs(3),
            max_open_connections: 0,
            max_idle_connections: 7,
        }
        .normalized();
        assert_eq!(config.max_lifetime, Duration::from_secs(60));
        assert_eq!(config.max_idle_time, Duration::from_secs(3));
        assert_eq!(config.max_open_connections, 50);
        assert_eq!(config.max_idle_connections, 7);
    }

    #[tokio::test]
    async fn test_open_retries_until_ready() {
        let backend = MemoryBackend::new();
        backend.state().fail_pings(2, ErrorKind::Driver);

        let pool = open_pool(&backend, &"memory://", &PoolConfig::default(), &fast_retry())
            .await
            .unwrap();
        assert_eq!(backend.state().ping_count(), 3);
        assert!(!pool.is_closed());
        assert_eq!(pool.stats().max_connections, 50);
    }

    #[tokio::test]
    async fn test_open_gives_up_after_attempt_budget() {
        let backend = MemoryBackend::new();
        backend.state().fail_pings(10, ErrorKind::Driver);

        let err = open_pool(&backend, &"memory://", &PoolConfig::default(), &fast_retry())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Connect { attempts: 5, .. }));
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(backend.state().is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_immediately() {
        let backend = MemoryBackend::new();
        backend.state().fail_pings(10, ErrorKind::Cancelled);

        let err = open_pool(&backend, &"memory://", &PoolConfig::default(), &fast_retry())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Connect { attempts: 1, .. }));
        assert_eq!(backend.state().ping_count(), 1);
    }

    #[tokio::test]
    async fn test_connector_failure() {
        struct Broken;
        impl Connector for Broken {
            fn dsn(&self) -> DbResult<String> {
                Err(DbError::Connector("unknown mode: bogus".to_string()))
            }
        }

        let backend = MemoryBackend::new();
        let err = open_pool(&backend, &Broken, &PoolConfig::default(), &fast_retry())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "connector: unknown mode: bogus");
        assert_eq!(backend.state().ping_count(), 0);
    }
}

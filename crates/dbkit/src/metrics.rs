//! Operation instrumentation
//!
//! Every wrapped database call is reported to a [`MetricCollector`] with its
//! name, elapsed time and error, if any.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{DbError, DbResult};

/// Observer of wrapped database operations
pub trait MetricCollector: Send + Sync {
    fn observe(&self, operation: &str, elapsed: Duration, error: Option<&DbError>);
}

/// Time `future`, report it under `operation`, and return its result unchanged
pub async fn collecting<T, F>(metrics: &dyn MetricCollector, operation: &str, future: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    let start = Instant::now();
    let result = future.await;
    metrics.observe(operation, start.elapsed(), result.as_ref().err());
    result
}

/// Discards every observation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl MetricCollector for NoMetrics {
    fn observe(&self, _operation: &str, _elapsed: Duration, _error: Option<&DbError>) {}
}

/// Emits one tracing event per observation
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricCollector for TracingMetrics {
    fn observe(&self, operation: &str, elapsed: Duration, error: Option<&DbError>) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match error {
            Some(err) => tracing::debug!(operation, elapsed_ms, error = %err, "database operation failed"),
            None => tracing::debug!(operation, elapsed_ms, "database operation completed"),
        }
    }
}

/// Counters for one operation name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub calls: u64,
    pub errors: u64,
    pub total_time: Duration,
    pub max_time: Duration,
}

impl OperationStats {
    pub fn average_time(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_time.as_nanos() / u128::from(self.calls);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Per-operation counters kept in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    operations: DashMap<String, OperationStats>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, operation: &str) -> Option<OperationStats> {
        self.operations.get(operation).map(|stats| *stats)
    }

    /// Snapshot of every operation, sorted by name
    pub fn snapshot(&self) -> Vec<(String, OperationStats)> {
        let mut all: Vec<_> = self
            .operations
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn reset(&self) {
        self.operations.clear();
    }
}

impl MetricCollector for InMemoryMetrics {
    fn observe(&self, operation: &str, elapsed: Duration, error: Option<&DbError>) {
        let mut stats = self.operations.entry(operation.to_string()).or_default();
        stats.calls += 1;
        if error.is_some() {
            stats.errors += 1;
        }
        stats.total_time += elapsed;
        stats.max_time = stats.max_time.max(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collecting_returns_result_unchanged() {
        let metrics = InMemoryMetrics::new();

        let ok = collecting(&metrics, "list_users", async { Ok::<_, DbError>(3) }).await;
        assert_eq!(ok.unwrap(), 3);

        let err = collecting(&metrics, "list_users", async { Err::<i32, _>(DbError::NoRows) }).await;
        assert!(err.unwrap_err().is_no_rows());

        let stats = metrics.get("list_users").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.errors, 1);
        assert!(metrics.get("other").is_none());
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = InMemoryMetrics::new();
        metrics.observe("b", Duration::from_millis(4), None);
        metrics.observe("a", Duration::from_millis(2), None);
        metrics.observe("a", Duration::from_millis(6), None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot[0].0, "a");
        assert_eq!(snapshot[0].1.average_time(), Duration::from_millis(4));
        assert_eq!(snapshot[0].1.max_time, Duration::from_millis(6));

        metrics.reset();
        assert!(metrics.snapshot().is_empty());
    }

    #[test]
    fn test_average_time_beyond_u32_calls() {
        let stats = OperationStats {
            calls: 1 << 32,
            total_time: Duration::from_secs(1 << 32),
            ..Default::default()
        };
        assert_eq!(stats.average_time(), Duration::from_secs(1));

        let stats = OperationStats {
            calls: u64::from(u32::MAX) + 2,
            total_time: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(stats.average_time(), Duration::from_nanos(2));
        assert_eq!(OperationStats::default().average_time(), Duration::ZERO);
    }
}

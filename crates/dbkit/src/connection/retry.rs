//! Readiness retry policy
//!
//! Exponential backoff for the liveness probe issued while opening a pool.

use std::time::Duration;

/// Exponential backoff bounded by an attempt count and/or an elapsed-time budget.
/// With both bounds unset the probe is retried until the caller drops the future.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Maximum number of probes, including the first
    pub max_attempts: Option<u32>,
    /// Maximum time spent probing, measured from the first probe
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: None,
            max_elapsed: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Probe once, never retry
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            max_elapsed: None,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = Some(elapsed);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay before the next probe, after `attempt` failed probes (1-based).
    /// `None` once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if let Some(max_attempts) = self.max_attempts {
            if attempt >= max_attempts {
                return None;
            }
        }

        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let delay = delay.min(self.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_attempts: None,
            max_elapsed: None,
        };
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for_attempt(1000), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.delay_for_attempt(2).is_some());
        assert_eq!(policy.delay_for_attempt(3), None);
        assert_eq!(RetryPolicy::no_retry().delay_for_attempt(1), None);
    }
}

//! Delay computation between poll cycles

use std::time::Duration;
use tracing::debug;

use crate::config::RetryPolicy;

/// Tracks consecutive failures and yields the wait before the next cycle
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            interval,
            policy,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A cycle succeeded: back to the plain interval
    pub fn record_success(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.interval
    }

    /// A cycle failed: delay before the next attempt
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let exponent = (self.consecutive_failures - 1).min(32) as i32;
        let grown_ms = self.interval.as_millis() as f64 * self.policy.backoff_multiplier.powi(exponent);
        let ceiling = self.policy.max_delay.max(self.interval);
        let delay = Duration::from_millis(grown_ms.min(ceiling.as_millis() as f64) as u64);

        let delay = if self.policy.use_jitter {
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            Duration::from_millis((delay.as_millis() as f64 * (1.0 + jitter)) as u64)
        } else {
            delay
        };

        debug!(
            failures = self.consecutive_failures,
            next_delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        delay
    }

    /// Whether the configured ceiling has been reached
    pub fn exhausted(&self) -> bool {
        self.policy
            .max_consecutive_failures
            .map_or(false, |max| self.consecutive_failures >= max)
    }
}

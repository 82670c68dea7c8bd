//! Poller configuration
//!
//! ```rust
//! use callwatch_monitor_core::config::{ConnectionMode, PollerConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let config = PollerConfig::new("pbx-main")
//!     .with_interval(Duration::from_secs(3))
//!     .with_connection_mode(ConnectionMode::KeepAlive)
//!     .with_retry(RetryPolicy::exponential(2.0, Duration::from_secs(60)));
//!
//! assert!(config.validate(Some(Duration::from_secs(2))).is_ok());
//! assert!(config.validate(Some(Duration::from_secs(5))).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MonitorError, MonitorResult};
use crate::parser::CallerIdStrategy;

/// Verbose channel listing on the Asterisk console
pub const CHANNEL_LISTING_COMMAND: &str = "asterisk -rx 'core show channels verbose'";

/// Default wait between cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Session lifetime policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// One session reused across cycles until it fails
    KeepAlive,
    /// Connect, poll and disconnect every cycle
    PerCycle,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        ConnectionMode::KeepAlive
    }
}

/// Delay policy after failed cycles
///
/// The default reproduces a plain monitor loop: retry forever, waiting
/// the poll interval between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Stop the loop after this many failed cycles in a row
    pub max_consecutive_failures: Option<u32>,
    /// Growth factor per consecutive failure; 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Upper bound for the grown delay
    pub max_delay: Duration,
    /// Spread retry delays by +/-10%
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: None,
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(300),
            use_jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay equal to the poll interval, unbounded retries
    pub fn fixed() -> Self {
        Self::default()
    }

    /// Exponential growth from the poll interval up to `max_delay`
    pub fn exponential(multiplier: f64, max_delay: Duration) -> Self {
        Self {
            backoff_multiplier: multiplier,
            max_delay,
            use_jitter: true,
            ..Self::default()
        }
    }

    pub fn with_max_consecutive_failures(mut self, attempts: u32) -> Self {
        self.max_consecutive_failures = Some(attempts);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }
}

/// Configuration of one poll loop controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Label used in logs and cycle reports
    pub target_name: String,
    /// Wait after each completed cycle
    pub interval: Duration,
    /// Remote command producing the channel listing
    pub command: String,
    pub connection_mode: ConnectionMode,
    pub retry: RetryPolicy,
    pub caller_id_strategy: CallerIdStrategy,
}

impl PollerConfig {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            interval: DEFAULT_POLL_INTERVAL,
            command: CHANNEL_LISTING_COMMAND.to_string(),
            connection_mode: ConnectionMode::default(),
            retry: RetryPolicy::default(),
            caller_id_strategy: CallerIdStrategy::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_caller_id_strategy(mut self, strategy: CallerIdStrategy) -> Self {
        self.caller_id_strategy = strategy;
        self
    }

    /// Check the configuration against the executor's command timeout
    ///
    /// The command timeout must be shorter than the interval so cycles
    /// cannot pile up behind a hung command.
    pub fn validate(&self, command_timeout: Option<Duration>) -> MonitorResult<()> {
        if self.interval.is_zero() {
            return Err(MonitorError::invalid_config("interval", "must be greater than zero"));
        }
        if self.command.trim().is_empty() {
            return Err(MonitorError::invalid_config("command", "must not be empty"));
        }
        if let Some(timeout) = command_timeout {
            if timeout >= self.interval {
                return Err(MonitorError::invalid_config(
                    "command_timeout",
                    format!(
                        "{}ms must be shorter than the poll interval ({}ms)",
                        timeout.as_millis(),
                        self.interval.as_millis()
                    ),
                ));
            }
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(MonitorError::invalid_config(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.retry.max_consecutive_failures == Some(0) {
            return Err(MonitorError::invalid_config(
                "retry.max_consecutive_failures",
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

//! Error types for the polling engine
//!
//! Every failure a poll cycle can hit falls in one of two buckets that the
//! controller treats the same way (drop the session, reconnect next cycle):
//!
//! - **Connection errors** - authentication, unreachable host, refused or
//!   timed out session setup
//! - **Command errors** - non-empty stderr, non-zero exit, undecodable
//!   output, command timeout
//!
//! Malformed listing lines are never errors; the parser degrades them to
//! "skip" or `CallState::Unknown`.

use thiserror::Error;

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Coarse classification used by the controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connection,
    Command,
    Configuration,
    Shutdown,
}

/// Errors raised by the polling engine and its executors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    // ===== Connection =====
    #[error("Connection to {target} failed: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Authentication failed for {target}: {reason}")]
    AuthenticationFailed { target: String, reason: String },

    #[error("Connection to {target} timed out after {duration_ms}ms")]
    ConnectionTimeout { target: String, duration_ms: u64 },

    #[error("Session lost: {reason}")]
    SessionLost { reason: String },

    // ===== Command =====
    #[error("Command wrote to stderr: {stderr}")]
    CommandStderr { stderr: String },

    #[error("Command exited with status {status}: {detail}")]
    CommandFailed { status: i32, detail: String },

    #[error("Command output is not valid UTF-8: {reason}")]
    OutputDecode { reason: String },

    #[error("Command timed out after {duration_ms}ms")]
    CommandTimeout { duration_ms: u64 },

    #[error("Could not launch {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    // ===== Configuration =====
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // ===== Loop control =====
    #[error("Giving up after {attempts} consecutive failed cycles: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Poll task terminated abnormally: {reason}")]
    TaskFailed { reason: String },
}

impl MonitorError {
    /// Shorthand for configuration errors
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error for the controller state machine
    pub fn kind(&self) -> FailureKind {
        match self {
            MonitorError::ConnectionFailed { .. }
            | MonitorError::AuthenticationFailed { .. }
            | MonitorError::ConnectionTimeout { .. }
            | MonitorError::SessionLost { .. } => FailureKind::Connection,

            MonitorError::CommandStderr { .. }
            | MonitorError::CommandFailed { .. }
            | MonitorError::OutputDecode { .. }
            | MonitorError::CommandTimeout { .. }
            | MonitorError::SpawnFailed { .. } => FailureKind::Command,

            MonitorError::InvalidConfiguration { .. } => FailureKind::Configuration,

            MonitorError::RetriesExhausted { .. } | MonitorError::TaskFailed { .. } => {
                FailureKind::Shutdown
            }
        }
    }

    /// Whether retrying on the next cycle can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), FailureKind::Connection | FailureKind::Command)
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::AuthenticationFailed { .. } => "auth",
            MonitorError::ConnectionFailed { .. }
            | MonitorError::ConnectionTimeout { .. }
            | MonitorError::SessionLost { .. } => "network",
            MonitorError::CommandStderr { .. }
            | MonitorError::CommandFailed { .. }
            | MonitorError::CommandTimeout { .. }
            | MonitorError::SpawnFailed { .. } => "command",
            MonitorError::OutputDecode { .. } => "decode",
            MonitorError::InvalidConfiguration { .. } => "configuration",
            MonitorError::RetriesExhausted { .. } => "retry",
            MonitorError::TaskFailed { .. } => "task",
        }
    }
}

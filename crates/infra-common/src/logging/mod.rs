//! Logging setup and contextual spans

pub mod context;
pub mod setup;

pub use context::LogContext;
pub use setup::{log_welcome, parse_log_level, setup_logging, LoggingConfig, LoggingGuard};

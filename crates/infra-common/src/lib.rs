//! Common infrastructure for the callwatch workspace
//!
//! Shared plumbing that is not specific to polling a switch:
//!
//! - [`errors`] - error type used by the infrastructure helpers
//! - [`logging`] - tracing subscriber setup and logging context spans
//! - [`tasks`] - tracked, cancellable task spawning with bounded shutdown

pub mod errors;
pub mod logging;
pub mod tasks;

pub use errors::{Error, Result};
pub use logging::{setup_logging, LoggingConfig, LoggingGuard};
pub use tasks::{TaskManager, TaskStats};

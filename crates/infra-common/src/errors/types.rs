use thiserror::Error;

/// Errors raised by the infrastructure helpers
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unusable configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The logging subsystem could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// A task could not be spawned or did not shut down cleanly
    #[error("Task error: {0}")]
    Task(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

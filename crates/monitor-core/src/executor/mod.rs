//! Remote command execution
//!
//! The engine only needs two things from a transport: open a session,
//! and run one command on it. [`RemoteCommandExecutor`] opens sessions,
//! [`RemoteSession`] runs commands. [`ssh::SshExecutor`] implements both on
//! top of the system OpenSSH client; tests use in-memory fakes.

pub mod ssh;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MonitorError, MonitorResult};

pub use ssh::{Credential, SshExecutor, SshTarget};

/// Raw result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Remote exit status, when the transport reports one
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Successful output with the given stdout text
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into().into_bytes(),
            stderr: Vec::new(),
            exit_code: Some(0),
        }
    }

    /// Decode stdout, failing the cycle on stderr noise or a bad exit
    ///
    /// Non-empty stderr wins over everything else: a session that complains
    /// is not trusted even if it also produced a listing.
    pub fn into_listing(self) -> MonitorResult<String> {
        if !self.stderr.is_empty() {
            let text = String::from_utf8_lossy(&self.stderr).trim().to_string();
            let stderr = if text.is_empty() {
                "whitespace-only error output".to_string()
            } else {
                text
            };
            return Err(MonitorError::CommandStderr { stderr });
        }

        if let Some(status) = self.exit_code.filter(|code| *code != 0) {
            return Err(MonitorError::CommandFailed {
                status,
                detail: "no error output".to_string(),
            });
        }

        String::from_utf8(self.stdout).map_err(|e| MonitorError::OutputDecode {
            reason: e.utf8_error().to_string(),
        })
    }
}

/// Opens sessions against one monitored target
#[async_trait]
pub trait RemoteCommandExecutor: Send + Sync {
    /// Human-readable target, e.g. `admin@10.0.0.5:22`
    fn target(&self) -> String;

    /// Upper bound the executor enforces on a single command, if any
    fn command_timeout(&self) -> Option<Duration> {
        None
    }

    /// Establish and authenticate a session
    async fn connect(&self) -> MonitorResult<Box<dyn RemoteSession>>;
}

/// An established session
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command` and collect its output
    ///
    /// Transport failures are errors; a command that ran but failed is an
    /// `Ok` output with stderr and/or a non-zero exit code.
    async fn execute(&mut self, command: &str) -> MonitorResult<CommandOutput>;

    /// Tear the session down; best effort, never fails
    async fn close(&mut self);
}

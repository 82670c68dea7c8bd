//! OpenSSH-backed executor
//!
//! `connect` starts a background multiplexing master (`ssh -fN -M`) and
//! waits for it to authenticate; every `execute` then runs a short-lived
//! `ssh` client over the master's control socket, so the TCP session and
//! authentication are reused between polls. Password authentication goes
//! through `sshpass -e`, which reads the password from the environment.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CommandOutput, RemoteCommandExecutor, RemoteSession};
use crate::error::{MonitorError, MonitorResult};

/// Exit status OpenSSH uses for its own (transport) failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// sshpass exit status for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Extra time granted to the master beyond `ConnectTimeout`
const MASTER_GRACE: Duration = Duration::from_secs(5);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Secret passed to the remote login; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Connection parameters for one switch
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password; key-based authentication is used when absent
    pub credential: Option<Credential>,
    pub identity_file: Option<PathBuf>,
    pub ssh_program: String,
    pub sshpass_program: String,
    /// Directory holding the multiplexing control socket
    pub control_dir: PathBuf,
    /// Idle time after which an orphaned master exits on its own
    pub control_persist: Duration,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Trust unknown host keys on first use
    pub accept_new_host_keys: bool,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            credential: None,
            identity_file: None,
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            control_dir: std::env::temp_dir(),
            control_persist: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(2),
            accept_new_host_keys: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// `user@host:port`
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Argument lists for the three ssh invocations of a session
#[derive(Debug, Clone)]
struct SshInvocation {
    target: SshTarget,
    control_path: PathBuf,
}

impl SshInvocation {
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.target.port.to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.target.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if self.target.accept_new_host_keys {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=accept-new".to_string());
        }
        if let Some(identity) = &self.target.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn master_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPersist={}", self.target.control_persist.as_secs().max(1)),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
        ]);
        if self.target.credential.is_some() {
            args.push("-o".to_string());
            args.push("NumberOfPasswordPrompts=1".to_string());
        } else {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.extend(["-f".to_string(), "-N".to_string(), self.target.destination()]);
        args
    }

    fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-T".to_string(),
            self.target.destination(),
            "--".to_string(),
            command.to_string(),
        ]);
        args
    }

    fn exit_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.target.destination()]);
        args
    }

    /// Master startup, wrapped in sshpass when a password is configured
    fn master_command(&self) -> Command {
        let mut cmd = match &self.target.credential {
            Some(credential) => {
                let mut cmd = Command::new(&self.target.sshpass_program);
                cmd.arg("-e")
                    .arg(&self.target.ssh_program)
                    .env("SSHPASS", credential.expose());
                cmd
            }
            None => Command::new(&self.target.ssh_program),
        };
        cmd.args(self.master_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn launcher(&self) -> &str {
        if self.target.credential.is_some() {
            &self.target.sshpass_program
        } else {
            &self.target.ssh_program
        }
    }
}

/// [`RemoteCommandExecutor`] using the system OpenSSH client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    invocation: Arc<SshInvocation>,
}

impl SshExecutor {
    pub fn new(target: SshTarget) -> Self {
        // unique per executor so two pollers never share (or close) a master
        let tag = Uuid::new_v4().simple().to_string();
        let control_path = target
            .control_dir
            .join(format!("callwatch-{}-%C", &tag[..8]));
        Self {
            invocation: Arc::new(SshInvocation {
                target,
                control_path,
            }),
        }
    }

    pub fn ssh_target(&self) -> &SshTarget {
        &self.invocation.target
    }
}

#[async_trait]
impl RemoteCommandExecutor for SshExecutor {
    fn target(&self) -> String {
        self.invocation.target.label()
    }

    fn command_timeout(&self) -> Option<Duration> {
        Some(self.invocation.target.command_timeout)
    }

    async fn connect(&self) -> MonitorResult<Box<dyn RemoteSession>> {
        let invocation = &self.invocation;
        let label = invocation.target.label();
        let mut child = invocation
            .master_command()
            .spawn()
            .map_err(|e| MonitorError::SpawnFailed {
                program: invocation.launcher().to_string(),
                reason: e.to_string(),
            })?;

        let limit = invocation.target.connect_timeout + MASTER_GRACE;
        let status = match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(MonitorError::ConnectionFailed {
                    target: label,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(MonitorError::ConnectionTimeout {
                    target: label,
                    duration_ms: limit.as_millis() as u64,
                })
            }
        };

        if status.success() {
            debug!(remote = %label, "SSH master established");
            return Ok(Box::new(SshSession {
                invocation: invocation.clone(),
                closed: false,
            }));
        }

        // the master did not fork, so the pipe reaches EOF promptly
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = timeout(CLOSE_TIMEOUT, pipe.read_to_string(&mut stderr)).await;
        }
        Err(classify_connect_failure(
            label,
            status.code(),
            stderr.trim(),
            invocation.target.credential.is_some(),
        ))
    }
}

fn classify_connect_failure(target: String, code: Option<i32>, stderr: &str, with_password: bool) -> MonitorError {
    let bad_password = with_password && code == Some(SSHPASS_BAD_PASSWORD);
    if bad_password || stderr.contains("Permission denied") {
        return MonitorError::AuthenticationFailed {
            target,
            reason: if stderr.is_empty() {
                "credentials rejected".to_string()
            } else {
                stderr.to_string()
            },
        };
    }
    let reason = if stderr.is_empty() {
        match code {
            Some(code) => format!("ssh exited with status {}", code),
            None => "ssh terminated by signal".to_string(),
        }
    } else {
        stderr.to_string()
    };
    MonitorError::ConnectionFailed { target, reason }
}

/// Session riding on an OpenSSH control master
pub struct SshSession {
    invocation: Arc<SshInvocation>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&mut self, command: &str) -> MonitorResult<CommandOutput> {
        if self.closed {
            return Err(MonitorError::SessionLost {
                reason: "session already closed".to_string(),
            });
        }

        let target = &self.invocation.target;
        let mut cmd = Command::new(&target.ssh_program);
        cmd.args(self.invocation.exec_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(target.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(MonitorError::SpawnFailed {
                    program: target.ssh_program.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(MonitorError::CommandTimeout {
                    duration_ms: target.command_timeout.as_millis() as u64,
                })
            }
        };

        let exit_code = output.status.code();
        if exit_code == Some(SSH_TRANSPORT_FAILURE) {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MonitorError::SessionLost {
                reason: if stderr.is_empty() {
                    "ssh exited with status 255".to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let target = &self.invocation.target;
        let mut cmd = Command::new(&target.ssh_program);
        cmd.args(self.invocation.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(CLOSE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(remote = %target.label(), "SSH master closed");
            }
            Ok(Ok(status)) => {
                debug!(remote = %target.label(), ?status, "SSH master already gone");
            }
            Ok(Err(e)) => warn!(remote = %target.label(), error = %e, "Could not stop SSH master"),
            Err(_) => warn!(remote = %target.label(), "Timed out stopping SSH master"),
        }
    }
}

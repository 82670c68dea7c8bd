//! Runtime settings: command-line arguments merged with an optional TOML file
//!
//! ```toml
//! call_log = "/var/log/callwatch/calls.jsonl"
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/callwatch"
//!
//! [[targets]]
//! name = "main-pbx"
//! host = "10.0.0.5"
//! username = "admin"
//! password_env = "MAIN_PBX_PASSWORD"
//! connection_mode = "per-cycle"
//!
//! [targets.caller_id]
//! strategy = "fixed_column"
//! index = 7
//! ```
//!
//! When the file lists targets they replace the single target described by
//! `--host`/`--username`. Every other flag given on the command line applies
//! to all targets and wins over the file; the file wins over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use callwatch_infra_common::logging::{parse_log_level, LoggingConfig};
use callwatch_monitor_core::{
    CallerIdStrategy, ConnectionMode, Credential, MonitorError, PollerConfig, RetryPolicy,
    SshTarget, CHANNEL_LISTING_COMMAND,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::Level;

use crate::args::Args;

/// Exponential backoff used by `--backoff`
const BACKOFF_MULTIPLIER: f64 = 2.0;
const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(300);

const DEFAULT_INTERVAL_SECS: u64 = 3;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 2;
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing {0}: pass it on the command line or list targets in the config file")]
    Missing(&'static str),

    #[error("Environment variable {0} (password for target {1}) is not set")]
    MissingPasswordEnv(String, String),

    #[error("Duplicate target name: {0}")]
    DuplicateTarget(String),

    #[error("Invalid log level: {0}")]
    LogLevel(String),

    #[error("Target {target}: {source}")]
    Target {
        target: String,
        #[source]
        source: MonitorError,
    },
}

/// On-disk configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub call_log: Option<PathBuf>,
    pub logging: LoggingSection,
    pub targets: Vec<TargetSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub json: bool,
    pub file_info: bool,
    pub dir: Option<PathBuf>,
}

/// One `[[targets]]` entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Name of the environment variable holding the password
    pub password_env: Option<String>,
    /// Clear-text password; prefer `password_env`
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub control_dir: Option<PathBuf>,
    pub command: Option<String>,
    pub connection_mode: Option<ConnectionMode>,
    pub caller_id: Option<CallerIdStrategy>,
    pub max_consecutive_failures: Option<u32>,
    pub accept_new_host_keys: Option<bool>,
}

fn default_port() -> u16 {
    22
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }
}

/// One fully resolved target
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub ssh: SshTarget,
    pub poller: PollerConfig,
}

/// Everything `main` needs to start
#[derive(Debug, Clone)]
pub struct Settings {
    pub targets: Vec<TargetSettings>,
    pub logging: LoggingConfig,
    pub call_log: Option<PathBuf>,
    pub console: bool,
}

impl Settings {
    /// Merge arguments and file, reading passwords from the process environment
    pub fn resolve(args: &Args, file: Option<FileConfig>) -> Result<Self, SettingsError> {
        Self::resolve_with_env(args, file, |name| std::env::var(name).ok())
    }

    pub fn resolve_with_env(
        args: &Args,
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let file = file.unwrap_or_default();

        let sections = if file.targets.is_empty() {
            vec![target_from_args(args)?]
        } else {
            file.targets.clone()
        };

        let mut targets = Vec::with_capacity(sections.len());
        for section in &sections {
            let target = resolve_target(args, section, &env)?;
            if targets
                .iter()
                .any(|t: &TargetSettings| t.poller.target_name == target.poller.target_name)
            {
                return Err(SettingsError::DuplicateTarget(target.poller.target_name));
            }
            targets.push(target);
        }

        Ok(Settings {
            targets,
            logging: logging_config(args, &file.logging)?,
            call_log: args.call_log.clone().or(file.call_log),
            console: !args.quiet,
        })
    }
}

fn target_from_args(args: &Args) -> Result<TargetSection, SettingsError> {
    let host = args.host.clone().ok_or(SettingsError::Missing("host"))?;
    let username = args.username.clone().ok_or(SettingsError::Missing("username"))?;
    Ok(TargetSection {
        name: None,
        host,
        port: args.port,
        username,
        password_env: None,
        password: args.password.clone(),
        identity_file: args.identity_file.clone(),
        interval_secs: None,
        command_timeout_secs: None,
        connect_timeout_secs: None,
        control_dir: None,
        command: None,
        connection_mode: None,
        caller_id: None,
        max_consecutive_failures: None,
        accept_new_host_keys: None,
    })
}

fn resolve_target(
    args: &Args,
    section: &TargetSection,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<TargetSettings, SettingsError> {
    let name = section.name.clone().unwrap_or_else(|| section.host.clone());

    let password = match &section.password_env {
        Some(var) => Some(
            env(var).ok_or_else(|| SettingsError::MissingPasswordEnv(var.clone(), name.clone()))?,
        ),
        None => section.password.clone(),
    };

    let interval = Duration::from_secs(
        args.interval
            .or(section.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS),
    );
    let command_timeout = Duration::from_secs(
        args.command_timeout
            .or(section.command_timeout_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
    );

    let mut ssh = SshTarget::new(&section.host, &section.username)
        .with_port(section.port)
        .with_command_timeout(command_timeout);
    if let Some(secs) = args.connect_timeout.or(section.connect_timeout_secs) {
        ssh = ssh.with_connect_timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = args.control_dir.as_ref().or(section.control_dir.as_ref()) {
        ssh = ssh.with_control_dir(dir);
    }
    if let Some(password) = password {
        ssh = ssh.with_credential(Credential::new(password));
    }
    if let Some(identity) = &section.identity_file {
        ssh = ssh.with_identity_file(identity);
    }
    ssh.accept_new_host_keys = if args.strict_host_keys {
        false
    } else {
        section.accept_new_host_keys.unwrap_or(true)
    };

    let connection_mode = if args.per_cycle {
        ConnectionMode::PerCycle
    } else {
        section.connection_mode.unwrap_or_default()
    };

    let caller_id_strategy = if args.legacy_caller_column {
        CallerIdStrategy::legacy()
    } else {
        section.caller_id.unwrap_or_default()
    };

    let mut retry = if args.backoff {
        RetryPolicy::exponential(BACKOFF_MULTIPLIER, BACKOFF_MAX_DELAY)
    } else {
        RetryPolicy::fixed()
    };
    if let Some(max) = args.max_failures.or(section.max_consecutive_failures) {
        retry = retry.with_max_consecutive_failures(max);
    }

    let poller = PollerConfig::new(name.clone())
        .with_interval(interval)
        .with_command(
            section
                .command
                .clone()
                .unwrap_or_else(|| CHANNEL_LISTING_COMMAND.to_string()),
        )
        .with_connection_mode(connection_mode)
        .with_caller_id_strategy(caller_id_strategy)
        .with_retry(retry);

    poller
        .validate(Some(command_timeout))
        .map_err(|source| SettingsError::Target {
            target: name,
            source,
        })?;

    Ok(TargetSettings { ssh, poller })
}

fn logging_config(args: &Args, section: &LoggingSection) -> Result<LoggingConfig, SettingsError> {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        let text = args
            .log_level
            .as_deref()
            .or(section.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL);
        parse_log_level(text).map_err(|_| SettingsError::LogLevel(text.to_string()))?
    };

    let mut config = LoggingConfig::new(level, "callwatch");
    if args.log_json || section.json {
        config = config.with_json();
    }
    if args.log_file_info || section.file_info {
        config = config.with_file_info();
    }
    if let Some(dir) = args.log_dir.as_ref().or(section.dir.as_ref()) {
        config = config.with_log_dir(dir);
    }
    Ok(config)
}

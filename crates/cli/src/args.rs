use std::path::PathBuf;

use clap::Parser;

/// Watch active calls on one or more Asterisk switches over SSH
#[derive(Parser, Debug, Clone)]
#[command(name = "callwatch", author, version, about, long_about = None)]
pub struct Args {
    /// TOML file listing targets and logging options
    #[arg(short, long, env = "CALLWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Asterisk host (used when the config file lists no targets)
    #[arg(long, env = "CALLWATCH_HOST")]
    pub host: Option<String>,

    /// SSH port
    #[arg(short, long, env = "CALLWATCH_PORT", default_value_t = 22)]
    pub port: u16,

    /// SSH user
    #[arg(short, long, env = "CALLWATCH_USER")]
    pub username: Option<String>,

    /// SSH password; prefer the environment variable to the flag
    #[arg(long, env = "CALLWATCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key for public-key authentication
    #[arg(short, long, env = "CALLWATCH_IDENTITY")]
    pub identity_file: Option<PathBuf>,

    /// Seconds between polls [default: 3]
    #[arg(long)]
    pub interval: Option<u64>,

    /// Seconds a single listing command may take, below the interval [default: 2]
    #[arg(long)]
    pub command_timeout: Option<u64>,

    /// Seconds allowed for the SSH handshake [default: 10]
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Directory for SSH control sockets [default: system temp dir]
    #[arg(long, env = "CALLWATCH_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// Open and close the SSH session on every poll
    #[arg(long)]
    pub per_cycle: bool,

    /// Grow the delay after repeated failures (doubling, capped at 5 minutes)
    #[arg(long)]
    pub backoff: bool,

    /// Stop after this many consecutive failed polls
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Read the caller number from column 8 only, like older releases
    #[arg(long)]
    pub legacy_caller_column: bool,

    /// Refuse hosts whose key is not already in known_hosts
    #[arg(long)]
    pub strict_host_keys: bool,

    /// Append call transitions as JSON lines to this file
    #[arg(long)]
    pub call_log: Option<PathBuf>,

    /// Do not print the call list to stdout
    #[arg(short, long)]
    pub quiet: bool,

    /// Log level: trace, debug, info, warn, error [default: warn]
    #[arg(long, env = "CALLWATCH_LOG")]
    pub log_level: Option<String>,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Include source file and line in log lines
    #[arg(long)]
    pub log_file_info: bool,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

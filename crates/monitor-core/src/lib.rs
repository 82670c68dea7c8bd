//! # callwatch-monitor-core
//!
//! Polling and diff engine that tracks active calls on an Asterisk switch.
//!
//! The switch is asked for its channel listing over a remote shell on a
//! fixed interval. Each listing is parsed into a [`Snapshot`] of
//! [`CallRecord`]s and compared with the previous one; the resulting
//! [`TransitionEvent`]s (started, unchanged, state changed, ended) are
//! handed to a [`PresentationSink`].
//!
//! ## Architecture
//!
//! ```text
//! PollController ──connect/execute──> RemoteCommandExecutor (OpenSSH)
//!       │
//!       ├── SnapshotExtractor ── LineParser      raw text -> Snapshot
//!       ├── reconcile(previous, current)         Snapshot x2 -> events
//!       └── PresentationSink                     CycleReport per cycle
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use callwatch_monitor_core::{
//!     PollController, PollerConfig, SshExecutor, SshTarget, TracingSink,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let target = SshTarget::new("10.0.0.5", "admin").with_identity_file("/root/.ssh/id_ed25519");
//! let config = PollerConfig::new("main-pbx").with_interval(Duration::from_secs(3));
//!
//! let controller = PollController::new(
//!     config,
//!     Arc::new(SshExecutor::new(target)),
//!     Arc::new(TracingSink),
//! )?;
//!
//! let handle = controller.spawn();
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod parser;
pub mod reconcile;
pub mod sink;
pub mod snapshot;

pub use call::{CallRecord, CallState, CallerId, SnapshotKey};
pub use config::{
    ConnectionMode, PollerConfig, RetryPolicy, CHANNEL_LISTING_COMMAND, DEFAULT_POLL_INTERVAL,
};
pub use controller::{Backoff, ControllerState, MonitorHandle, PollController};
pub use error::{FailureKind, MonitorError, MonitorResult};
pub use executor::{
    CommandOutput, Credential, RemoteCommandExecutor, RemoteSession, SshExecutor, SshTarget,
};
pub use parser::{parse_line, CallerIdStrategy, LineFields, LineParser};
pub use reconcile::{reconcile, TransitionEvent, TransitionKind};
pub use sink::{ChannelSink, ConnectionStatus, CycleReport, FanoutSink, PresentationSink, TracingSink};
pub use snapshot::{extract, Snapshot, SnapshotExtractor};

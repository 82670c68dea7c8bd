//! Presentation sinks
//!
//! The controller hands one [`CycleReport`] per poll cycle to a
//! [`PresentationSink`]. Rendering, persistence and forwarding all live
//! behind this trait; the engine never prints anything itself.
//!
//! ```rust
//! use async_trait::async_trait;
//! use callwatch_monitor_core::sink::{CycleReport, PresentationSink};
//!
//! struct CountingSink;
//!
//! #[async_trait]
//! impl PresentationSink for CountingSink {
//!     async fn on_cycle(&self, report: CycleReport) {
//!         println!("{}: {} active calls", report.target, report.active_calls().count());
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::call::CallRecord;
use crate::reconcile::{TransitionEvent, TransitionKind};

/// Connection status as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Session up; `since` is when it was established
    Connected { since: DateTime<Utc> },
    /// The cycle failed; the next one reconnects
    Disconnected { reason: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }
}

/// Everything one poll cycle produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub target: String,
    /// When the cycle started
    pub at: DateTime<Utc>,
    pub status: ConnectionStatus,
    /// Empty when the cycle failed
    pub events: Vec<TransitionEvent>,
}

impl CycleReport {
    /// Report for a cycle that failed before producing a snapshot
    pub fn failed(target: impl Into<String>, at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            at,
            status: ConnectionStatus::Disconnected {
                reason: reason.into(),
            },
            events: Vec::new(),
        }
    }

    /// Calls visible in this cycle, in listing order
    pub fn active_calls(&self) -> impl Iterator<Item = &CallRecord> {
        self.events.iter().filter_map(TransitionEvent::record)
    }

    /// Events other than `Unchanged`
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionEvent> {
        self.events
            .iter()
            .filter(|event| event.kind() != TransitionKind::Unchanged)
    }

    pub fn count(&self, kind: TransitionKind) -> usize {
        self.events.iter().filter(|event| event.kind() == kind).count()
    }
}

/// Receives cycle reports from a controller
#[async_trait]
pub trait PresentationSink: Send + Sync {
    async fn on_cycle(&self, report: CycleReport);
}

/// Forwards reports into a tokio channel
///
/// Uses `send().await`, so a slow consumer applies backpressure to the
/// controller instead of losing cycles. A closed receiver drops reports.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CycleReport>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<CycleReport>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<CycleReport>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PresentationSink for ChannelSink {
    async fn on_cycle(&self, report: CycleReport) {
        if self.tx.send(report).await.is_err() {
            debug!("Report receiver dropped; discarding cycle report");
        }
    }
}

/// Writes reports to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl PresentationSink for TracingSink {
    async fn on_cycle(&self, report: CycleReport) {
        match &report.status {
            ConnectionStatus::Disconnected { reason } => {
                warn!(target_name = %report.target, %reason, "Cycle failed");
            }
            ConnectionStatus::Connected { .. } => {
                for event in report.transitions() {
                    match event {
                        TransitionEvent::Started { key, record } => {
                            info!(target_name = %report.target, %key, state = %record.state, "Call started");
                        }
                        TransitionEvent::StateChanged {
                            key,
                            previous_state,
                            record,
                            ..
                        } => {
                            info!(
                                target_name = %report.target,
                                %key,
                                from = %previous_state,
                                to = %record.state,
                                "Call state changed"
                            );
                        }
                        TransitionEvent::Ended {
                            key,
                            previous_state,
                            ..
                        } => {
                            info!(target_name = %report.target, %key, last_state = %previous_state, "Call ended");
                        }
                        TransitionEvent::Unchanged { .. } => {}
                    }
                }
                debug!(
                    target_name = %report.target,
                    active = report.active_calls().count(),
                    "Cycle complete"
                );
            }
        }
    }
}

/// Delivers every report to several sinks, in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn PresentationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl PresentationSink for FanoutSink {
    async fn on_cycle(&self, report: CycleReport) {
        for sink in &self.sinks {
            sink.on_cycle(report.clone()).await;
        }
    }
}

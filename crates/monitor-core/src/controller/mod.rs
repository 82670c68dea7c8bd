//! Poll loop controller
//!
//! A [`PollController`] owns everything that lives across cycles for one
//! target: the session, the previous snapshot and the failure counter.
//! Each cycle runs connect-or-reuse, execute, extract, reconcile and
//! emit, in that order, then sleeps for the interval (or the backoff delay
//! after a failure).
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected --poll--> Polling
//!      ^                        |                  ^                 |
//!      |                        | error            +------ ok -------+
//!      +------------------------+--------------------- error --------+
//! ```
//!
//! Any failure drops the session and marks continuity as broken: the first
//! reconcile after the next successful connect compares against an empty
//! snapshot, so every visible call is reported as `Started`.

mod recovery;
mod state;

pub use recovery::Backoff;
pub use state::ControllerState;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConnectionMode, PollerConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::executor::{RemoteCommandExecutor, RemoteSession};
use crate::reconcile::{reconcile, TransitionEvent, TransitionKind};
use crate::sink::{ConnectionStatus, CycleReport, PresentationSink};
use crate::snapshot::{Snapshot, SnapshotExtractor};

/// Polls one target and reports call transitions
pub struct PollController {
    config: PollerConfig,
    executor: Arc<dyn RemoteCommandExecutor>,
    sink: Arc<dyn PresentationSink>,
    extractor: SnapshotExtractor,
    backoff: Backoff,
    state: ControllerState,
    session: Option<Box<dyn RemoteSession>>,
    connected_since: Option<DateTime<Utc>>,
    previous: Snapshot,
    /// Set on start and after any failure; cleared by the next connect
    resync_pending: bool,
    next_delay: Duration,
    last_error: Option<MonitorError>,
    cycles: u64,
}

impl PollController {
    /// Build a controller, validating the configuration against the executor
    pub fn new(
        config: PollerConfig,
        executor: Arc<dyn RemoteCommandExecutor>,
        sink: Arc<dyn PresentationSink>,
    ) -> MonitorResult<Self> {
        config.validate(executor.command_timeout())?;

        Ok(Self {
            extractor: SnapshotExtractor::new(config.caller_id_strategy),
            backoff: Backoff::new(config.interval, config.retry.clone()),
            next_delay: config.interval,
            config,
            executor,
            sink,
            state: ControllerState::Disconnected,
            session: None,
            connected_since: None,
            previous: Snapshot::empty(),
            resync_pending: true,
            last_error: None,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Snapshot the next cycle will be reconciled against
    pub fn previous_snapshot(&self) -> &Snapshot {
        &self.previous
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.consecutive_failures()
    }

    pub fn last_error(&self) -> Option<&MonitorError> {
        self.last_error.as_ref()
    }

    /// Wait scheduled after the most recent cycle
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one cycle and deliver its report to the sink
    ///
    /// Never fails: errors become a `Disconnected` report and schedule a
    /// reconnect for the next cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let at = Utc::now();
        self.cycles += 1;

        let report = match self.poll(at).await {
            Ok(events) => {
                self.next_delay = self.backoff.record_success();
                self.last_error = None;
                CycleReport {
                    target: self.config.target_name.clone(),
                    at,
                    status: ConnectionStatus::Connected {
                        since: self.connected_since.unwrap_or(at),
                    },
                    events,
                }
            }
            Err(error) => {
                self.fail(&error).await;
                self.next_delay = self.backoff.record_failure();
                CycleReport::failed(self.config.target_name.clone(), at, error.to_string())
            }
        };

        if self.config.connection_mode == ConnectionMode::PerCycle && self.session.is_some() {
            self.disconnect().await;
        }

        self.sink.on_cycle(report.clone()).await;
        report
    }

    /// Poll until `cancel` fires or the retry ceiling is reached
    ///
    /// Cancellation is observed while a cycle is in flight and during the
    /// sleep between cycles. The session is closed before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorResult<()> {
        info!(
            target_name = %self.config.target_name,
            remote = %self.executor.target(),
            interval_ms = self.config.interval.as_millis() as u64,
            mode = ?self.config.connection_mode,
            "Poll loop started"
        );

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = self.run_cycle() => {}
            }

            if self.backoff.exhausted() {
                let last_error = self
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                break Err(MonitorError::RetriesExhausted {
                    attempts: self.backoff.consecutive_failures(),
                    last_error,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.next_delay) => {}
            }
        };

        if self.session.is_some() {
            self.disconnect().await;
        }

        match &result {
            Ok(()) => info!(target_name = %self.config.target_name, cycles = self.cycles, "Poll loop stopped"),
            Err(e) => warn!(target_name = %self.config.target_name, error = %e, "Poll loop gave up"),
        }
        result
    }

    /// Run on its own task
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        self.spawn_with_token(cancel)
    }

    /// Run on its own task, stopping when `cancel` (or a parent of it) fires
    pub fn spawn_with_token(self, cancel: CancellationToken) -> MonitorHandle {
        let target = self.config.target_name.clone();
        let join = tokio::spawn(self.run(cancel.clone()));
        MonitorHandle {
            target,
            cancel,
            join,
        }
    }

    async fn poll(&mut self, at: DateTime<Utc>) -> MonitorResult<Vec<TransitionEvent>> {
        self.ensure_connected().await?;

        self.state = ControllerState::Polling;
        let session = self.session.as_mut().ok_or_else(|| MonitorError::SessionLost {
            reason: "no active session".to_string(),
        })?;
        let output = session.execute(&self.config.command).await?;
        let listing = output.into_listing()?;

        let current = self.extractor.extract(&listing, at);
        let events = reconcile(&self.previous, &current);
        self.previous = current.continued_from(&self.previous);
        self.state = ControllerState::Connected;

        debug!(
            target_name = %self.config.target_name,
            active = self.previous.len(),
            started = count(&events, TransitionKind::Started),
            changed = count(&events, TransitionKind::StateChanged),
            ended = count(&events, TransitionKind::Ended),
            "Poll cycle complete"
        );
        Ok(events)
    }

    async fn ensure_connected(&mut self) -> MonitorResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        self.state = ControllerState::Connecting;
        debug!(target_name = %self.config.target_name, remote = %self.executor.target(), "Connecting");
        let session = self.executor.connect().await?;

        self.session = Some(session);
        self.connected_since = Some(Utc::now());
        self.state = ControllerState::Connected;

        if self.resync_pending {
            self.previous = Snapshot::empty();
            self.resync_pending = false;
            info!(target_name = %self.config.target_name, remote = %self.executor.target(), "Connected");
        } else {
            debug!(target_name = %self.config.target_name, "Reconnected for cycle");
        }
        Ok(())
    }

    async fn fail(&mut self, error: &MonitorError) {
        warn!(
            target_name = %self.config.target_name,
            error = %error,
            category = error.category(),
            failures = self.backoff.consecutive_failures() + 1,
            "Poll cycle failed"
        );

        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.connected_since = None;
        self.resync_pending = true;
        self.state = ControllerState::Disconnected;
        self.last_error = Some(error.clone());
    }

    /// Planned close; continuity is kept
    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.connected_since = None;
        self.state = ControllerState::Disconnected;
    }
}

fn count(events: &[TransitionEvent], kind: TransitionKind) -> usize {
    events.iter().filter(|event| event.kind() == kind).count()
}

/// Handle to a controller running on its own task
pub struct MonitorHandle {
    target: String,
    cancel: CancellationToken,
    join: JoinHandle<MonitorResult<()>>,
}

impl MonitorHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the loop to stop; it exits within one interval
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) -> MonitorResult<()> {
        self.join.await.map_err(|e| MonitorError::TaskFailed {
            reason: e.to_string(),
        })?
    }

    /// Stop and wait
    pub async fn shutdown(self) -> MonitorResult<()> {
        self.stop();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::sink::TracingSink;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl RemoteCommandExecutor for Unreachable {
        fn target(&self) -> String {
            "nowhere".to_string()
        }

        fn command_timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(5))
        }

        async fn connect(&self) -> MonitorResult<Box<dyn RemoteSession>> {
            Err(MonitorError::ConnectionFailed {
                target: "nowhere".to_string(),
                reason: "refused".to_string(),
            })
        }
    }

    struct Silent;

    #[async_trait]
    impl RemoteSession for Silent {
        async fn execute(&mut self, _command: &str) -> MonitorResult<CommandOutput> {
            Ok(CommandOutput::from_stdout(""))
        }

        async fn close(&mut self) {}
    }

    #[test]
    fn test_rejects_timeout_longer_than_interval() {
        let config = PollerConfig::new("pbx").with_interval(Duration::from_secs(3));
        let result = PollController::new(config, Arc::new(Unreachable), Arc::new(TracingSink));
        assert!(matches!(
            result,
            Err(MonitorError::InvalidConfiguration { ref field, .. }) if field == "command_timeout"
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported_not_raised() {
        let config = PollerConfig::new("pbx").with_interval(Duration::from_secs(10));
        let mut controller =
            PollController::new(config, Arc::new(Unreachable), Arc::new(TracingSink)).unwrap();

        let report = controller.run_cycle().await;
        assert_eq!(
            report.status,
            ConnectionStatus::Disconnected {
                reason: "Connection to nowhere failed: refused".to_string()
            }
        );
        assert_eq!(controller.state(), ControllerState::Disconnected);
        assert_eq!(controller.consecutive_failures(), 1);
        assert_eq!(controller.next_delay(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_empty_listing_is_connected_with_no_events() {
        struct Once;

        #[async_trait]
        impl RemoteCommandExecutor for Once {
            fn target(&self) -> String {
                "pbx".to_string()
            }

            async fn connect(&self) -> MonitorResult<Box<dyn RemoteSession>> {
                Ok(Box::new(Silent))
            }
        }

        let mut controller =
            PollController::new(PollerConfig::new("pbx"), Arc::new(Once), Arc::new(TracingSink)).unwrap();
        let report = controller.run_cycle().await;

        assert!(report.status.is_connected());
        assert!(report.events.is_empty());
        assert_eq!(controller.state(), ControllerState::Connected);
        assert!(controller.state().has_session());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ControllerState::default().to_string(), "disconnected");
        assert_eq!(ControllerState::Polling.to_string(), "polling");
    }
}

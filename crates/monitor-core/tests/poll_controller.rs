//! End-to-end behaviour of the poll loop against a scripted executor

mod common;

use std::sync::Arc;
use std::time::Duration;

use callwatch_monitor_core::{
    CallState, ChannelSink, ConnectionMode, ConnectionStatus, ControllerState, MonitorError,
    PollController, PollerConfig, RetryPolicy, SnapshotKey, TracingSink, TransitionEvent,
    TransitionKind,
};
use common::{output, refused, stderr, ScriptedExecutor, Step};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const A: &str = "5551234567";
const B: &str = "5559876543";

fn controller(executor: &ScriptedExecutor, config: PollerConfig) -> PollController {
    PollController::new(config, Arc::new(executor.clone()), Arc::new(TracingSink)).unwrap()
}

fn kinds(events: &[TransitionEvent]) -> Vec<(String, TransitionKind)> {
    events
        .iter()
        .map(|event| (event.key().to_string(), event.kind()))
        .collect()
}

#[tokio::test]
async fn test_keep_alive_tracks_transitions() {
    let executor = ScriptedExecutor::new([
        output(&[(Some(A), "Ringing")]),
        output(&[(Some(A), "Up"), (Some(B), "Ringing")]),
        output(&[(Some(B), "Up")]),
    ]);
    let mut controller = controller(&executor, PollerConfig::new("pbx"));

    let first = controller.run_cycle().await;
    assert_eq!(kinds(&first.events), vec![(A.to_string(), TransitionKind::Started)]);

    let second = controller.run_cycle().await;
    assert_eq!(
        kinds(&second.events),
        vec![
            (A.to_string(), TransitionKind::StateChanged),
            (B.to_string(), TransitionKind::Started),
        ]
    );
    match &second.events[0] {
        TransitionEvent::StateChanged {
            previous_state,
            previous_started_at,
            record,
            ..
        } => {
            assert_eq!(*previous_state, CallState::Ringing);
            assert_eq!(*previous_started_at, first.at);
            assert_eq!(record.state, CallState::Up);
            assert_eq!(record.first_seen_at, first.at);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let third = controller.run_cycle().await;
    assert_eq!(
        kinds(&third.events),
        vec![
            (B.to_string(), TransitionKind::StateChanged),
            (A.to_string(), TransitionKind::Ended),
        ]
    );

    assert_eq!(executor.connects(), 1);
    assert_eq!(executor.closes(), 0);
    assert_eq!(controller.state(), ControllerState::Connected);
}

#[tokio::test]
async fn test_reconnect_resets_continuity() {
    let executor = ScriptedExecutor::new([
        output(&[(Some(A), "Up")]),
        stderr("Unable to connect to remote asterisk (does /var/run/asterisk/asterisk.ctl exist?)"),
        output(&[(Some(A), "Up")]),
    ]);
    let mut controller = controller(&executor, PollerConfig::new("pbx"));

    let first = controller.run_cycle().await;
    assert_eq!(first.count(TransitionKind::Started), 1);

    let failed = controller.run_cycle().await;
    assert!(matches!(failed.status, ConnectionStatus::Disconnected { ref reason } if reason.contains("asterisk.ctl")));
    assert!(failed.events.is_empty());
    assert_eq!(controller.state(), ControllerState::Disconnected);
    assert_eq!(executor.closes(), 1);

    // same call, but continuity was broken: reported as new, not unchanged
    let recovered = controller.run_cycle().await;
    assert_eq!(kinds(&recovered.events), vec![(A.to_string(), TransitionKind::Started)]);
    assert_eq!(executor.connects(), 2);
    assert_eq!(controller.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_connect_failure_then_recovery() {
    let executor = ScriptedExecutor::new([refused(), refused(), output(&[(Some(A), "Up")])]);
    let mut controller = controller(&executor, PollerConfig::new("pbx"));

    for expected_failures in 1..=2 {
        let report = controller.run_cycle().await;
        assert_eq!(
            report.status,
            ConnectionStatus::Disconnected {
                reason: "Connection to scripted@pbx:22 failed: Connection refused".to_string()
            }
        );
        assert_eq!(controller.consecutive_failures(), expected_failures);
        assert_eq!(executor.executed(), 0);
    }

    let report = controller.run_cycle().await;
    assert!(report.status.is_connected());
    assert_eq!(report.count(TransitionKind::Started), 1);
    assert!(controller.last_error().is_none());
}

#[tokio::test]
async fn test_transport_error_forces_reconnect() {
    let executor = ScriptedExecutor::new([
        output(&[(Some(A), "Up")]),
        Step::ExecError(MonitorError::SessionLost {
            reason: "Connection reset by peer".to_string(),
        }),
    ]);
    let mut controller = controller(&executor, PollerConfig::new("pbx"));

    controller.run_cycle().await;
    let failed = controller.run_cycle().await;
    assert!(!failed.status.is_connected());
    assert!(controller.previous_snapshot().contains(&SnapshotKey::caller(A)));

    // the next connect starts a fresh continuity window
    controller.run_cycle().await;
    assert!(controller.previous_snapshot().is_empty());
    assert_eq!(executor.connects(), 2);
}

#[tokio::test]
async fn test_per_cycle_mode_keeps_continuity() {
    let executor = ScriptedExecutor::new([
        output(&[(Some(A), "Up")]),
        output(&[(Some(A), "Up")]),
        output(&[]),
    ]);
    let config = PollerConfig::new("pbx").with_connection_mode(ConnectionMode::PerCycle);
    let mut controller = controller(&executor, config);

    let first = controller.run_cycle().await;
    assert_eq!(controller.state(), ControllerState::Disconnected);
    assert_eq!(first.count(TransitionKind::Started), 1);

    let second = controller.run_cycle().await;
    assert_eq!(kinds(&second.events), vec![(A.to_string(), TransitionKind::Unchanged)]);

    let third = controller.run_cycle().await;
    assert_eq!(kinds(&third.events), vec![(A.to_string(), TransitionKind::Ended)]);

    assert_eq!(executor.connects(), 3);
    assert_eq!(executor.closes(), 3);
}

#[tokio::test]
async fn test_unknown_callers_are_not_collapsed() {
    let executor = ScriptedExecutor::new([output(&[(None, "Ringing"), (Some(A), "Up"), (None, "Up")])]);
    let mut controller = controller(&executor, PollerConfig::new("pbx"));

    let report = controller.run_cycle().await;
    assert_eq!(
        kinds(&report.events),
        vec![
            ("unknown#1".to_string(), TransitionKind::Started),
            (A.to_string(), TransitionKind::Started),
            ("unknown#2".to_string(), TransitionKind::Started),
        ]
    );
    let unknown = report.events[0].record().unwrap();
    assert!(unknown.caller_id.is_unknown());
}

#[tokio::test]
async fn test_exponential_backoff_between_failures() {
    let executor = ScriptedExecutor::new([refused(), refused(), refused(), output(&[])]);
    let retry = RetryPolicy::exponential(2.0, Duration::from_secs(10)).without_jitter();
    let config = PollerConfig::new("pbx")
        .with_interval(Duration::from_secs(3))
        .with_retry(retry);
    let mut controller = controller(&executor, config);

    let mut delays = Vec::new();
    for _ in 0..4 {
        controller.run_cycle().await;
        delays.push(controller.next_delay());
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(3),
            Duration::from_secs(6),
            Duration::from_secs(10),
            Duration::from_secs(3),
        ]
    );
}

#[tokio::test]
async fn test_reports_reach_the_sink() {
    let executor = ScriptedExecutor::new([output(&[(Some(A), "Up")]), refused()]);
    let (sink, mut rx) = ChannelSink::channel(8);
    let mut controller =
        PollController::new(PollerConfig::new("main-pbx"), Arc::new(executor.clone()), Arc::new(sink)).unwrap();

    controller.run_cycle().await;
    let report = rx.recv().await.unwrap();
    assert_eq!(report.target, "main-pbx");
    assert!(report.status.is_connected());
    assert_eq!(report.active_calls().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_hanging_command() {
    let executor = ScriptedExecutor::new([output(&[(Some(A), "Up")]), Step::Hang])
        .with_command_timeout(Duration::from_secs(20));
    let (sink, mut rx) = ChannelSink::channel(8);
    let config = PollerConfig::new("pbx").with_interval(Duration::from_secs(30));
    let controller = PollController::new(config, Arc::new(executor.clone()), Arc::new(sink)).unwrap();

    let handle = controller.spawn();
    let first = rx.recv().await.unwrap();
    assert_eq!(first.count(TransitionKind::Started), 1);

    // let the loop sleep through the interval and block on the hung command
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(executor.executed(), 2);
    assert!(!handle.is_finished());

    let result = tokio::time::timeout(Duration::from_secs(1), handle.shutdown()).await;
    assert_eq!(result.unwrap(), Ok(()));
    assert_eq!(executor.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_sleep_is_prompt() {
    let executor = ScriptedExecutor::new([]);
    let config = PollerConfig::new("pbx").with_interval(Duration::from_secs(3600));
    let controller = controller(&executor, config);

    let parent = CancellationToken::new();
    let handle = controller.spawn_with_token(parent.child_token());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(executor.executed(), 1);

    let started = tokio::time::Instant::now();
    parent.cancel();
    assert_eq!(handle.join().await, Ok(()));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_ends_the_loop() {
    let executor = ScriptedExecutor::new([refused(), refused(), refused(), refused()]);
    let retry = RetryPolicy::fixed().with_max_consecutive_failures(3);
    let config = PollerConfig::new("pbx").with_retry(retry);
    let controller = controller(&executor, config);

    let result = controller.run(CancellationToken::new()).await;
    match result {
        Err(MonitorError::RetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("Connection refused"));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(executor.connects(), 3);
}

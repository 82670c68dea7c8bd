//! Plain-text call list on stdout

use std::fmt::{self, Write as _};
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use callwatch_monitor_core::{
    CallRecord, ConnectionStatus, CycleReport, PresentationSink, SnapshotKey, TransitionEvent,
};
use chrono::{Local, TimeZone};
use tracing::debug;

const SEPARATOR_WIDTH: usize = 70;

/// Prints every cycle to stdout
pub struct ConsoleSink {
    /// Prefix each block with the target name (several targets share stdout)
    show_target: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout(show_target: bool) -> Self {
        Self {
            show_target,
            out: Mutex::new(Box::new(std::io::stdout())),
        }
    }
}

#[async_trait]
impl PresentationSink for ConsoleSink {
    async fn on_cycle(&self, report: CycleReport) {
        let text = render(&report, &Local, self.show_target);
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            debug!(error = %e, "Could not write to stdout");
        }
    }
}

/// Render one cycle report, timestamps shown in `tz`
pub fn render<Tz>(report: &CycleReport, tz: &Tz, show_target: bool) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let mut text = String::new();
    if show_target {
        let _ = writeln!(text, "[{}]", report.target);
    }

    match &report.status {
        ConnectionStatus::Connected { since } => {
            let since = since.with_timezone(tz);
            let _ = writeln!(
                text,
                "Connection to Asterisk: ✅ at {}",
                since.format("%H:%M %d.%m.%Y")
            );
        }
        ConnectionStatus::Disconnected { reason } => {
            let _ = writeln!(text, "Connection to Asterisk: ❌ {}", reason);
            let _ = writeln!(text, "\n{}", "-".repeat(SEPARATOR_WIDTH));
            return text;
        }
    }

    let at = report.at.with_timezone(tz);
    let _ = writeln!(text, "Update: {}\n", at.format("%d-%m-%Y %H:%M:%S"));

    let mut active = 0;
    for event in &report.events {
        match event {
            TransitionEvent::Started { record, .. } => {
                active += 1;
                let _ = writeln!(text, "{}  [new]", call_line(active, record));
            }
            TransitionEvent::Unchanged { record, .. } => {
                active += 1;
                let _ = writeln!(text, "{}", call_line(active, record));
            }
            TransitionEvent::StateChanged {
                previous_state,
                record,
                ..
            } => {
                active += 1;
                let _ = writeln!(text, "{}  [was {}]", call_line(active, record), previous_state);
            }
            TransitionEvent::Ended { .. } => {}
        }
    }
    if active == 0 {
        let _ = writeln!(text, "No active calls.");
    }

    for event in &report.events {
        if let TransitionEvent::Ended {
            key,
            previous_state,
            ..
        } = event
        {
            let _ = writeln!(
                text,
                "   call from {} ended ({})",
                caller_label(key),
                previous_state
            );
        }
    }

    let _ = writeln!(text, "\n{}", "-".repeat(SEPARATOR_WIDTH));
    text
}

fn call_line(index: usize, record: &CallRecord) -> String {
    format!(
        "📞 {} call from {} — {} ({})",
        index, record.caller_id, record.duration, record.state
    )
}

fn caller_label(key: &SnapshotKey) -> String {
    match key {
        SnapshotKey::Caller(number) => number.clone(),
        SnapshotKey::Unidentified(_) => "unknown number".to_string(),
    }
}

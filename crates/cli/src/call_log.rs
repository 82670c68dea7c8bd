//! JSON-lines log of call transitions

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use callwatch_monitor_core::{CycleReport, PresentationSink, TransitionEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Serialize)]
struct CallLogEntry<'a> {
    target: &'a str,
    at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a TransitionEvent,
}

/// Appends one line per started, changed or ended call
///
/// Unchanged calls and failed cycles are not logged.
pub struct CallLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl CallLogSink {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Serialized lines for one report
pub fn entries(report: &CycleReport) -> serde_json::Result<String> {
    let mut lines = String::new();
    for event in report.transitions() {
        let entry = CallLogEntry {
            target: &report.target,
            at: report.at,
            event,
        };
        lines.push_str(&serde_json::to_string(&entry)?);
        lines.push('\n');
    }
    Ok(lines)
}

#[async_trait]
impl PresentationSink for CallLogSink {
    async fn on_cycle(&self, report: CycleReport) {
        let lines = match entries(&report) {
            Ok(lines) if lines.is_empty() => return,
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, "Could not serialize call log entry");
                return;
            }
        };

        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(lines.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Could not append to call log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callwatch_monitor_core::{CallRecord, CallState, CallerId, ConnectionStatus, SnapshotKey};
    use chrono::TimeZone;
    use serde_json::Value;

    fn report() -> CycleReport {
        let at = Utc.with_ymd_and_hms(2025, 4, 17, 9, 30, 0).unwrap();
        let record = CallRecord::new(
            CallerId::Number("5551234567".to_string()),
            CallState::Ringing,
            "00:00:04",
            at,
        );
        CycleReport {
            target: "main-pbx".to_string(),
            at,
            status: ConnectionStatus::Connected { since: at },
            events: vec![
                TransitionEvent::Started {
                    key: SnapshotKey::caller("5551234567"),
                    record: record.clone(),
                },
                TransitionEvent::Unchanged {
                    key: SnapshotKey::caller("5550001111"),
                    record,
                },
                TransitionEvent::Ended {
                    key: SnapshotKey::Unidentified(0),
                    previous_state: CallState::Up,
                    previous_started_at: at,
                },
            ],
        }
    }

    #[test]
    fn test_entries_skip_unchanged() {
        let text = entries(&report()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "started");
        assert_eq!(lines[0]["target"], "main-pbx");
        assert_eq!(lines[0]["record"]["state"], "Ringing");
        assert_eq!(lines[1]["event"], "ended");
        assert_eq!(lines[1]["previous_state"], "Up");
    }

    #[test]
    fn test_failed_cycle_writes_nothing() {
        let report = CycleReport::failed("main-pbx", Utc::now(), "refused");
        assert_eq!(entries(&report).unwrap(), "");
    }

    #[tokio::test]
    async fn test_sink_appends() {
        let path = std::env::temp_dir()
            .join(format!("callwatch-test-{}", uuid::Uuid::new_v4()))
            .join("calls.jsonl");

        let sink = CallLogSink::open(&path).await.unwrap();
        sink.on_cycle(report()).await;
        sink.on_cycle(report()).await;

        let text = tokio::fs::read_to_string(sink.path()).await.unwrap();
        assert_eq!(text.lines().count(), 4);

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}

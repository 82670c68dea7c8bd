//! Snapshot reconciliation
//!
//! Compares two consecutive snapshots and classifies every key of either
//! one exactly once:
//!
//! | previous | current | event          |
//! |----------|---------|----------------|
//! | absent   | present | `Started`      |
//! | same     | state   | `Unchanged`    |
//! | other    | state   | `StateChanged` |
//! | present  | absent  | `Ended`        |
//!
//! Output order: current keys in listing order, then keys that only exist
//! in the previous snapshot, in their prior order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallRecord, CallState, SnapshotKey};
use crate::snapshot::Snapshot;

/// Change of one call between two polls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransitionEvent {
    Started {
        key: SnapshotKey,
        record: CallRecord,
    },
    Unchanged {
        key: SnapshotKey,
        record: CallRecord,
    },
    StateChanged {
        key: SnapshotKey,
        previous_state: CallState,
        previous_started_at: DateTime<Utc>,
        record: CallRecord,
    },
    Ended {
        key: SnapshotKey,
        previous_state: CallState,
        previous_started_at: DateTime<Utc>,
    },
}

/// Event kind without payload, handy for counting and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Started,
    Unchanged,
    StateChanged,
    Ended,
}

impl TransitionEvent {
    pub fn key(&self) -> &SnapshotKey {
        match self {
            TransitionEvent::Started { key, .. }
            | TransitionEvent::Unchanged { key, .. }
            | TransitionEvent::StateChanged { key, .. }
            | TransitionEvent::Ended { key, .. } => key,
        }
    }

    pub fn kind(&self) -> TransitionKind {
        match self {
            TransitionEvent::Started { .. } => TransitionKind::Started,
            TransitionEvent::Unchanged { .. } => TransitionKind::Unchanged,
            TransitionEvent::StateChanged { .. } => TransitionKind::StateChanged,
            TransitionEvent::Ended { .. } => TransitionKind::Ended,
        }
    }

    /// The current record, for every kind except `Ended`
    pub fn record(&self) -> Option<&CallRecord> {
        match self {
            TransitionEvent::Started { record, .. }
            | TransitionEvent::Unchanged { record, .. }
            | TransitionEvent::StateChanged { record, .. } => Some(record),
            TransitionEvent::Ended { .. } => None,
        }
    }
}

/// Classify every key of `previous` and `current`
///
/// Pure: neither snapshot is modified. Records in the output carry the
/// first-seen time of the previous snapshot when the call continues.
pub fn reconcile(previous: &Snapshot, current: &Snapshot) -> Vec<TransitionEvent> {
    let mut events = Vec::with_capacity(current.len() + previous.len());

    for (key, record) in current.iter() {
        let event = match previous.get(key) {
            None => TransitionEvent::Started {
                key: key.clone(),
                record: record.clone(),
            },
            Some(prior) if prior.state == record.state => TransitionEvent::Unchanged {
                key: key.clone(),
                record: record.continuing_from(prior.first_seen_at),
            },
            Some(prior) => TransitionEvent::StateChanged {
                key: key.clone(),
                previous_state: prior.state,
                previous_started_at: prior.first_seen_at,
                record: record.continuing_from(prior.first_seen_at),
            },
        };
        events.push(event);
    }

    for (key, prior) in previous.iter() {
        if !current.contains(key) {
            events.push(TransitionEvent::Ended {
                key: key.clone(),
                previous_state: prior.state,
                previous_started_at: prior.first_seen_at,
            });
        }
    }

    events
}

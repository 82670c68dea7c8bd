//! Call record types
//!
//! A [`CallRecord`] is one line of the switch's channel listing that looks
//! like an active call. Records are keyed inside a snapshot by
//! [`SnapshotKey`], which keeps calls with no recognisable caller number
//! apart from real numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calling party as recognised from the listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerId {
    /// Digit string of at least seven digits
    Number(String),
    /// No token on the line qualified as a caller number
    Unknown,
}

impl CallerId {
    /// The number, if one was recognised
    pub fn number(&self) -> Option<&str> {
        match self {
            CallerId::Number(n) => Some(n),
            CallerId::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, CallerId::Unknown)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerId::Number(n) => write!(f, "{}", n),
            CallerId::Unknown => write!(f, "unknown number"),
        }
    }
}

/// Channel state as inferred from the listing line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Ringing,
    Up,
    Dialing,
    Setup,
    Unknown,
}

impl CallState {
    /// Keyword states in match priority order
    pub const KEYWORDS: [CallState; 4] = [
        CallState::Ringing,
        CallState::Up,
        CallState::Dialing,
        CallState::Setup,
    ];

    /// Text searched for in a listing line
    pub fn keyword(&self) -> &'static str {
        match self {
            CallState::Ringing => "Ringing",
            CallState::Up => "Up",
            CallState::Dialing => "Dialing",
            CallState::Setup => "Setup",
            CallState::Unknown => "Unknown",
        }
    }

    /// First keyword contained in `line`, else `Unknown`
    pub fn detect(line: &str) -> CallState {
        Self::KEYWORDS
            .iter()
            .copied()
            .find(|state| line.contains(state.keyword()))
            .unwrap_or(CallState::Unknown)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Identity of a call within a snapshot
///
/// Unidentified calls are keyed by their ordinal among the unknown-caller
/// lines of one listing, so two simultaneous anonymous calls stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKey {
    Caller(String),
    Unidentified(usize),
}

impl SnapshotKey {
    pub fn caller(number: impl Into<String>) -> Self {
        SnapshotKey::Caller(number.into())
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKey::Caller(n) => write!(f, "{}", n),
            SnapshotKey::Unidentified(i) => write!(f, "unknown#{}", i + 1),
        }
    }
}

/// One active call as seen at one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub caller_id: CallerId,
    pub state: CallState,
    /// Trailing token of the listing line, verbatim (e.g. "00:01:45")
    pub duration: String,
    /// When the poll that produced this record ran
    pub observed_at: DateTime<Utc>,
    /// First poll of the current continuity window that saw this call
    pub first_seen_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(
        caller_id: CallerId,
        state: CallState,
        duration: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            caller_id,
            state,
            duration: duration.into(),
            observed_at,
            first_seen_at: observed_at,
        }
    }

    /// Copy of this record that keeps an earlier first-seen time
    pub fn continuing_from(&self, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            first_seen_at,
            ..self.clone()
        }
    }
}

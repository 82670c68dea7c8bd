//! Channel listing line parser
//!
//! `core show channels verbose` prints one whitespace-aligned row per
//! channel:
//!
//! ```text
//! Channel              Context  Extension  Prio State   Application  Data   CallerID   Duration Accountcode PeerAccount BridgeID
//! SIP/trunk-00000012   from-pstn 100       1    Up      Dial         SIP/100 5551234567 00:00:45
//! ```
//!
//! Column counts drift between Asterisk versions, so the parser does not
//! trust positions: the caller number is the first all-digit token of at
//! least [`MIN_CALLER_ID_DIGITS`] digits, the state is found by keyword and
//! the duration is the last token.

use crate::call::{CallState, CallerId};
use serde::{Deserialize, Serialize};

/// Rows with fewer tokens cannot hold a caller id column
pub const MIN_CALL_LINE_TOKENS: usize = 8;

/// Shortest digit run treated as a phone number
pub const MIN_CALLER_ID_DIGITS: usize = 7;

/// Column used by the legacy fixed-position strategy
pub const LEGACY_CALLER_ID_COLUMN: usize = 7;

/// How the caller number is located within a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CallerIdStrategy {
    /// First token that is all digits and long enough (default)
    Scan,
    /// Token at a fixed index, if it is a full-length number; breaks when columns shift
    FixedColumn { index: usize },
}

impl Default for CallerIdStrategy {
    fn default() -> Self {
        CallerIdStrategy::Scan
    }
}

impl CallerIdStrategy {
    /// Fixed column at [`LEGACY_CALLER_ID_COLUMN`]
    pub fn legacy() -> Self {
        CallerIdStrategy::FixedColumn {
            index: LEGACY_CALLER_ID_COLUMN,
        }
    }
}

/// Fields recovered from one listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFields {
    pub caller_id: CallerId,
    pub state: CallState,
    pub duration: String,
}

/// Row parser with a configurable caller-id strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct LineParser {
    strategy: CallerIdStrategy,
}

impl LineParser {
    pub fn new(strategy: CallerIdStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> CallerIdStrategy {
        self.strategy
    }

    /// Parse one row; `None` means "not a call line"
    pub fn parse(&self, line: &str) -> Option<LineFields> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < MIN_CALL_LINE_TOKENS {
            return None;
        }

        let caller_id = match self.strategy {
            CallerIdStrategy::Scan => tokens
                .iter()
                .find(|t| is_caller_number(t))
                .map(|t| CallerId::Number((*t).to_string())),
            CallerIdStrategy::FixedColumn { index } => tokens
                .get(index)
                .filter(|t| is_caller_number(t))
                .map(|t| CallerId::Number((*t).to_string())),
        }
        .unwrap_or(CallerId::Unknown);

        // len >= MIN_CALL_LINE_TOKENS, so there is a last token
        let duration = tokens.last().map(|t| t.to_string()).unwrap_or_default();

        Some(LineFields {
            caller_id,
            state: CallState::detect(line),
            duration,
        })
    }
}

/// Parse one row with the default (scanning) strategy
pub fn parse_line(line: &str) -> Option<LineFields> {
    LineParser::default().parse(line)
}

fn is_all_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// All-digit token long enough to be a phone number
pub fn is_caller_number(token: &str) -> bool {
    token.len() >= MIN_CALLER_ID_DIGITS && is_all_digits(token)
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a poll loop controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerState {
    /// No session; the next cycle connects
    Disconnected,
    /// Session setup in progress
    Connecting,
    /// Session established, idle between polls
    Connected,
    /// Listing command in flight
    Polling,
}

impl ControllerState {
    pub fn has_session(&self) -> bool {
        matches!(self, ControllerState::Connected | ControllerState::Polling)
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        ControllerState::Disconnected
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Disconnected => "disconnected",
            ControllerState::Connecting => "connecting",
            ControllerState::Connected => "connected",
            ControllerState::Polling => "polling",
        };
        f.write_str(name)
    }
}

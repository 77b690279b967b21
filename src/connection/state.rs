//! Connection lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of one agent connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No process is running.
    #[default]
    Disconnected,
    /// Process spawned, handshake in flight.
    Connecting,
    /// Handshake completed; requests may be sent.
    Connected,
    /// Spawn, handshake, or the running process failed.
    Error,
}

impl ConnectionState {
    /// Check whether a transition from `self` to `next` is valid.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected | Self::Error, Self::Connecting)
                | (
                    Self::Connecting,
                    Self::Connected | Self::Error | Self::Disconnected
                )
                | (Self::Connected | Self::Error, Self::Disconnected)
                | (Self::Connected, Self::Error)
        )
    }

    /// Whether a connect attempt may start from this state.
    #[must_use]
    pub fn can_connect(self) -> bool {
        self.can_transition_to(Self::Connecting)
    }

    /// Lower-case name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

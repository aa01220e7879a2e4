/// Connection state definitions for one persistent session
///
/// This module defines all possible states a connection can be in.
use std::fmt;

/// Represents the current state of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Nothing opened yet
    Idle,

    /// Transport (and TLS) being established
    Connecting,

    /// Protocol engine running, requests in flight
    Connected,

    /// Fatal condition hit or every request completed; draining
    Closing,

    /// Transport, TLS objects and resolver released
    Closed,
}

impl ConnectionState {
    /// Returns true if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if the protocol engine may still exchange frames
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connected | Self::Closing)
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    ///
    /// Teardown (`-> Closed`) is allowed from every state and is idempotent.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Closed) => true,
            (Idle, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting, Closing) => true,
            (Connected, Closing) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

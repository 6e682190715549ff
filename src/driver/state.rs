//! Connection state machine.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ◄──► Reconnecting
//!       │               │             │               │
//!       └───────────────┴─────────────┴───────────────┴──► Closed
//! ```
//!
//! `Closed` is terminal and only reached through an explicit close.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the broker connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection has been requested yet.
    #[default]
    Disconnected,
    /// First connect loop is running.
    Connecting,
    /// Connection is live and the topology is in place.
    Connected,
    /// Connection was lost; a connect loop is restoring it.
    Reconnecting,
    /// Explicitly closed; no further reconnection happens.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closed, Connected, Connecting, Disconnected, Reconnecting};

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Disconnected | Connecting | Connected | Reconnecting, Closed)
        )
    }

    /// Returns `true` for the terminal state.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns a lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

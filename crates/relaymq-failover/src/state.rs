//! Connection state machine for the failover transport.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the logical broker connection.
///
/// ```text
/// Disconnected --start()--> Reconnecting
/// Reconnecting --connect success--> Connected
/// Reconnecting --retry budget exhausted--> Closed
/// Connected --transport failure--> Reconnecting
/// * --close()--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Initial state, before `start()`.
    Disconnected,
    /// A connect attempt is in flight for the very first connection.
    Connecting,
    /// A physical transport is established and usable.
    Connected,
    /// No usable transport; the reconnect task is attempting candidates.
    Reconnecting,
    /// Terminal. No transition leaves this state.
    Closed,
}

impl ConnectionState {
    /// True once the transport can never carry traffic again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// True while callers may delegate sends to a physical transport.
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Broadcast snapshot observed by blocked `oneway`/`request` callers.
///
/// `replaying` is the explicit replay-in-progress guard: after a reconnect
/// the state is already `Connected`, but new sends must wait until the
/// in-flight command table has been replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Current connection state.
    pub state: ConnectionState,
    /// Whether tracked commands are currently being resent.
    pub replaying: bool,
}

impl StateSnapshot {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self {
            state,
            replaying: false,
        }
    }

    /// True when a caller may proceed to send.
    pub fn ready(self) -> bool {
        self.state.is_usable() && !self.replaying
    }
}

//! Broker commands and responses carried over the failover transport.
//!
//! A [`Command`] is the unit of traffic the orchestrator delegates to a
//! physical transport. Identifiers are assigned by the orchestrator before
//! first send and increase monotonically, which is what gives replay after a
//! failover its ordering guarantee.

use bytes::Bytes;

/// Broad classification of a command, used by the orchestrator to decide
/// what to do with it while no physical transport is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Application message destined for the broker.
    Message,
    /// Acknowledgement of a previously dispatched message. Stale after a
    /// reconnect, so never worth blocking on while disconnected.
    Ack,
    /// Connection shutdown notice. Pointless to queue for a dead peer.
    Shutdown,
    /// Session/consumer/producer control traffic.
    Control,
}

/// A command submitted by the layer above the failover transport.
#[derive(Debug, Clone)]
pub struct Command {
    id: Option<u64>,
    kind: CommandKind,
    payload: Bytes,
    response_required: bool,
}

impl Command {
    /// Creates a new command with no identifier assigned yet.
    pub fn new(kind: CommandKind, payload: Bytes, response_required: bool) -> Self {
        Self {
            id: None,
            kind,
            payload,
            response_required,
        }
    }

    /// Convenience constructor for an application message.
    pub fn message(payload: Bytes) -> Self {
        Self::new(CommandKind::Message, payload, false)
    }

    /// The identifier assigned by the orchestrator, if any.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Command classification.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The command payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the caller expects a correlated response from the broker.
    pub fn response_required(&self) -> bool {
        self.response_required
    }

    /// Assigns `id` if the command does not carry one yet, returning the
    /// effective identifier. Re-sends keep their original id so replay
    /// ordering and response correlation stay stable.
    pub(crate) fn assign_id(&mut self, id: u64) -> u64 {
        *self.id.get_or_insert(id)
    }
}

/// A correlated response received from the broker.
#[derive(Debug, Clone)]
pub struct Response {
    correlation_id: u64,
    payload: Bytes,
}

impl Response {
    /// Creates a response correlated to the command with the given id.
    pub fn new(correlation_id: u64, payload: Bytes) -> Self {
        Self {
            correlation_id,
            payload,
        }
    }

    /// Identifier of the command this response answers.
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// The response payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

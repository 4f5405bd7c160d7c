//! Physical transport contract consumed by the failover orchestrator.
//!
//! A physical transport is one concrete connection to one broker endpoint
//! (socket plus codec). The orchestrator never constructs one directly; it
//! goes through a [`TransportFactory`] supplied at construction time so that
//! tests can substitute an in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::command::{Command, Response};
use crate::error::{Result, TransportError};
use crate::uri::BrokerUri;

/// Asynchronous traffic flowing back from a physical transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// An unsolicited command pushed by the broker (dispatches, control).
    Command(Command),
    /// A correlated response to an earlier request.
    Response(Response),
    /// A transport-level failure; the connection is unusable afterwards.
    Error(TransportError),
}

/// One concrete connection to one broker endpoint.
#[async_trait]
pub trait PhysicalTransport: Send + Sync {
    /// Starts the transport. Must be called before any send.
    async fn start(&self) -> Result<()>;

    /// Closes the transport, releasing the underlying connection.
    async fn close(&self) -> Result<()>;

    /// Sends a command without waiting for a broker response.
    async fn oneway(&self, command: Command) -> Result<()>;

    /// Sends a command and waits for its correlated response.
    async fn request(&self, command: Command, timeout: Option<Duration>) -> Result<Response>;

    /// Registers the channel over which inbound commands, responses, and
    /// transport-level failures are delivered. Replaces any prior listener.
    fn set_listener(&self, listener: UnboundedSender<TransportEvent>);
}

/// Creates physical transports for candidate broker URIs.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Constructs (but does not start) a transport for the given endpoint.
    async fn create(&self, uri: &BrokerUri) -> Result<std::sync::Arc<dyn PhysicalTransport>>;
}

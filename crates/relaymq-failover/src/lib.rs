#![warn(missing_docs)]

//! Failover transport: one logical broker connection on top of a pool of candidate endpoints, with automatic reconnect, backoff, and command replay

pub mod backoff;
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod failover;
pub mod mock;
pub mod state;
pub mod tracker;
pub mod transport;
pub mod uri;

pub use command::{Command, CommandKind, Response};
pub use config::FailoverConfig;
pub use discovery::DiscoveryEvent;
pub use error::{Result, TransportError};
pub use failover::{FailoverEvent, FailoverStats, FailoverTransport};
pub use state::ConnectionState;
pub use transport::{PhysicalTransport, TransportEvent, TransportFactory};
pub use uri::BrokerUri;

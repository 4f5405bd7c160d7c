//! Bridge between a broker discovery agent and the candidate URI set.
//!
//! The discovery mechanism itself (multicast, static lists, registry
//! lookups) lives outside this crate; an agent simply pushes
//! [`DiscoveryEvent`]s over a channel handed to
//! [`FailoverTransport::attach_discovery`](crate::FailoverTransport::attach_discovery),
//! which turns them into `add_uri`/`remove_uri` calls.

use crate::uri::BrokerUri;

/// A change in the set of reachable brokers, as reported by a discovery
/// agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A broker service appeared.
    Added(BrokerUri),
    /// A broker service disappeared.
    Removed(BrokerUri),
}

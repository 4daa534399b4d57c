//! In-memory implementation of the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The broker routes messages between connections.
pub mod broker;

/// Subscriptions stream messages routed to them.
pub mod subscription;

/// Transports are connections to a broker.
pub mod transport;

pub use broker::MemoryBroker;
pub use subscription::MemorySubscription;
pub use transport::{Error, MemoryTransport};

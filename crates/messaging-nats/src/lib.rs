//! NATS implementation of the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Identity configuration for NATS connections.
pub mod config;

/// Pooled connections keyed by identity name.
pub mod factory;

/// Subscriptions wrap NATS subscribers.
pub mod subscription;

/// The NATS transport.
pub mod transport;

pub use config::{NatsIdentity, NatsIdentityConfig, TlsConfig};
pub use factory::NatsConnectionFactory;
pub use subscription::NatsSubscription;
pub use transport::{Error, NatsTransport};

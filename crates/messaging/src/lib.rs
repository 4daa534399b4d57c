//! Abstract interface for subject-based publish/subscribe transports.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Codecs turn typed values into message payloads and back.
pub mod codec;

/// Messages are what transports deliver.
pub mod message;

/// Service handlers answer single-responder requests.
pub mod service_handler;

/// Subjects are hierarchical, dot-separated addresses.
pub mod subject;

/// Subscriptions are streams of messages matching a subject.
pub mod subscription;

/// Subscription handlers process messages for subscribers.
pub mod subscription_handler;

/// Transports publish, subscribe and request.
pub mod transport;

pub use codec::{Codec, CodecError};
pub use message::Message;
pub use subscription::Subscription;
pub use transport::{Transport, TransportError};

//! Acknowledged delivery on top of a fire-and-forget publish/subscribe transport.
//!
//! Subscribers announce their queue group on a subject, publishers count the groups they
//! hear from and, when asked to, wait until every known group acknowledged a message,
//! retrying with backoff when that does not happen in time.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The facade handing out publishers and subscribers for a connection.
pub mod client;

/// Wire format and subject naming of the acknowledgement protocol.
pub mod envelope;

/// Quorum-acknowledged publishing.
pub mod publisher;

/// Linear backoff retries.
pub mod retry;

/// Explicit registration of event and request handlers.
pub mod service;

/// Consumer side of the protocol.
pub mod subscriber;

pub use client::{Client, ClientOptions, PublishOptions, RequestOptions, SubscribeOptions};
pub use envelope::{AckRequest, decode_payload, is_acknowledge_event};
pub use publisher::{Publisher, PublisherOptions, SubscriberCount};
pub use retry::{AttemptLog, RetryConfig, RetryRunner};
pub use service::{EventOptions, ServiceManager, ServiceOptions};
pub use subscriber::{Subscriber, SubscriberOptions};

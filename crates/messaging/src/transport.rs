use crate::message::Message;
use crate::subscription::Subscription;

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for transport errors
pub trait TransportError: Error + Send + Sync + 'static {}

/// A connection to a publish/subscribe transport.
///
/// Transports give no delivery guarantee: a publish with no matching subscriber is
/// dropped, and a publish to a queue group reaches exactly one of its members.
#[async_trait]
pub trait Transport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// The subscription type returned by `subscribe`.
    type Subscription: Subscription<Error = Self::Error>;

    /// Publishes a payload to a concrete subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), Self::Error>;

    /// Subscribes to a subject pattern, optionally as a member of a queue group.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Self::Subscription, Self::Error>;

    /// Sends a payload and waits for the first reply.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message, Self::Error>;

    /// Replies to a message carrying a reply subject.
    async fn respond(&self, message: &Message, payload: Bytes) -> Result<(), Self::Error>;

    /// Waits until everything published so far has been written to the connection.
    async fn flush(&self) -> Result<(), Self::Error>;

    /// Whether the connection is currently usable.
    fn is_connected(&self) -> bool;
}

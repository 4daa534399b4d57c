use crate::message::Message;
use crate::transport::TransportError;

use std::fmt::Debug;

use async_trait::async_trait;
use futures::Stream;

/// A live interest in a subject, yielding every message routed to it.
///
/// The stream ends once the subscription is unsubscribed or the connection closes.
#[async_trait]
pub trait Subscription
where
    Self: Stream<Item = Message> + Debug + Send + Unpin + 'static,
{
    /// The error type for the subscription.
    type Error: TransportError;

    /// The subject (or pattern) subscribed to.
    fn subject(&self) -> &str;

    /// Stops delivery to this subscription.
    async fn unsubscribe(&mut self) -> Result<(), Self::Error>;
}

use crate::codec::CodecError;
use crate::message::Message;

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

/// Marker trait for subscription handler errors
pub trait SubscriptionHandlerError: Error + Send + Sync + 'static {}

/// Why a message could not be processed by a handler.
#[derive(Debug)]
pub enum HandlerFailure<E> {
    /// The payload could not be decoded.
    Decode(CodecError),

    /// The handler returned an error.
    Handler(E),
}

impl<E> Display for HandlerFailure<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(error) => write!(f, "decode failure: {error}"),
            Self::Handler(error) => write!(f, "handler failure: {error}"),
        }
    }
}

/// Sends the acknowledgement of the message a handler was given.
pub struct Acknowledgement {
    send: Box<dyn FnOnce() -> BoxFuture<'static, bool> + Send>,
}

impl Acknowledgement {
    /// Wraps the function publishing the acknowledgement.
    pub fn new<F, Fut>(send: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            send: Box::new(move || send().boxed()),
        }
    }

    /// Publishes the acknowledgement.
    ///
    /// Returns whether one was sent; messages that did not ask for it return `false`.
    pub async fn acknowledge(self) -> bool {
        (self.send)().await
    }
}

impl Debug for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acknowledgement").finish_non_exhaustive()
    }
}

/// A trait representing a handler of messages on a subject.
#[async_trait]
pub trait SubscriptionHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for the handler.
    type Error: SubscriptionHandlerError;

    /// Handles the given message.
    async fn handle(&self, message: Message) -> Result<(), Self::Error>;

    /// Handles a message that is not acknowledged automatically.
    ///
    /// The default delegates to `handle` and drops `ack`, leaving the message
    /// unacknowledged.
    async fn handle_with_ack(
        &self,
        message: Message,
        _ack: Acknowledgement,
    ) -> Result<(), Self::Error> {
        self.handle(message).await
    }

    /// Called with the raw message when it could not be processed.
    ///
    /// Consumption continues afterwards; the message is not acknowledged.
    async fn on_error(&self, _failure: HandlerFailure<Self::Error>, _message: Message) {}
}

use async_nats::client::{PublishErrorKind, RequestErrorKind};
use courier_messaging::TransportError;
use courier_messaging::subject::SubjectError;
use thiserror::Error;

/// Errors that can occur on a NATS connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Flushing the connection failed.
    #[error("failed to flush: {0}")]
    Flush(String),

    /// The message has no reply subject to respond to.
    #[error("message on {0} has no reply subject")]
    NoReplySubject(String),

    /// A request found nobody subscribed to its subject.
    #[error("no responders for {0}")]
    NoResponders(String),

    /// Publish error.
    #[error("failed to publish: {0}")]
    Publish(PublishErrorKind),

    /// Request error.
    #[error("request failed: {0}")]
    Request(RequestErrorKind),

    /// Invalid subject.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// Subscribe error.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    /// A request did not receive a reply in time.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// Unsubscribe error.
    #[error("failed to unsubscribe: {0}")]
    Unsubscribe(String),
}

impl TransportError for Error {}

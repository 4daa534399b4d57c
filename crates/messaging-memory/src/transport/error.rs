use courier_messaging::TransportError;
use courier_messaging::subject::SubjectError;
use thiserror::Error;

/// Errors that can occur on an in-memory connection.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// A request found nobody subscribed to its subject.
    #[error("no responders for {0}")]
    NoResponders(String),

    /// The message has no reply subject to respond to.
    #[error("message on {0} has no reply subject")]
    NoReplySubject(String),

    /// Invalid subject.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// A request did not receive a reply in time.
    #[error("request to {0} timed out")]
    Timeout(String),
}

impl TransportError for Error {}

use crate::{publisher, subscriber};

use courier_messaging::{CodecError, TransportError};
use thiserror::Error;

/// Errors that can occur in a client.
#[derive(Debug, Error)]
pub enum Error<TE>
where
    TE: TransportError,
{
    /// A payload could not be encoded or a reply decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A publisher could not be created.
    #[error(transparent)]
    Publisher(publisher::Error<TE>),

    /// The responder reported a failure.
    #[error("service error: {0}")]
    Service(String),

    /// A subscriber could not be created or subscribed.
    #[error(transparent)]
    Subscriber(subscriber::Error<TE>),

    /// The transport failed.
    #[error(transparent)]
    Transport(TE),
}

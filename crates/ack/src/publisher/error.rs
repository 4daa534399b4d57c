use crate::retry;

use courier_messaging::subject::SubjectError;
use courier_messaging::{CodecError, TransportError};
use thiserror::Error;

/// Why a single delivery attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError<TE>
where
    TE: TransportError,
{
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Fewer consumer groups acknowledged than expected before the timeout.
    #[error("{acknowledged} of {expected} consumer groups acknowledged, missing {missing:?}")]
    InsufficientAcknowledgements {
        /// Groups expected when the attempt started.
        expected: usize,

        /// Distinct groups that acknowledged.
        acknowledged: usize,

        /// Known groups that did not acknowledge.
        missing: Vec<String>,
    },

    /// The transport failed.
    #[error(transparent)]
    Transport(TE),
}

/// Errors that can occur in a publisher.
#[derive(Debug, Error)]
pub enum Error<TE>
where
    TE: TransportError,
{
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Every delivery attempt failed.
    #[error("request not fulfilled: {0}")]
    Retry(retry::Error<AttemptError<TE>>),

    /// Invalid subject.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// The transport failed.
    #[error(transparent)]
    Transport(TE),
}

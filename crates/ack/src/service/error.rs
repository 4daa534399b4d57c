use crate::subscriber;

use courier_messaging::TransportError;
use thiserror::Error;

/// Errors that can occur in a service manager.
#[derive(Debug, Error)]
pub enum Error<TE>
where
    TE: TransportError,
{
    /// `start` was called twice.
    #[error("service manager already started")]
    AlreadyStarted,

    /// A registration could not subscribe.
    #[error("failed to start {subject}: {source}")]
    Registration {
        /// The registration's subject.
        subject: String,

        /// The underlying error.
        source: subscriber::Error<TE>,
    },
}

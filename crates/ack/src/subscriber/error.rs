use courier_messaging::TransportError;
use courier_messaging::subject::SubjectError;
use thiserror::Error;

/// Errors that can occur in a subscriber.
#[derive(Debug, Error)]
pub enum Error<TE>
where
    TE: TransportError,
{
    /// Queue group names are the unit of quorum counting and must not be empty.
    #[error("queue group name must not be empty")]
    EmptyQueueGroup,

    /// Invalid subject.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// The transport failed.
    #[error(transparent)]
    Transport(TE),
}

use std::fmt::{self, Debug, Display};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// One failed attempt.
#[derive(Clone, Debug)]
pub struct AttemptRecord<E> {
    /// The attempt number, starting at 1.
    pub attempt: usize,

    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,

    /// Why it failed.
    pub error: E,
}

/// Every failed attempt of one run, in order.
#[derive(Clone, Debug)]
pub struct AttemptLog<E> {
    records: Vec<AttemptRecord<E>>,
}

impl<E> Default for AttemptLog<E> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<E> AttemptLog<E> {
    pub(crate) fn record(&mut self, attempt: usize, error: E) {
        self.records.push(AttemptRecord {
            attempt,
            failed_at: Utc::now(),
            error,
        });
    }

    /// Number of failed attempts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no attempt failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AttemptRecord<E>> {
        self.records.iter()
    }

    /// The most recent failure.
    #[must_use]
    pub fn last(&self) -> Option<&AttemptRecord<E>> {
        self.records.last()
    }

    /// Consumes the log.
    #[must_use]
    pub fn into_records(self) -> Vec<AttemptRecord<E>> {
        self.records
    }
}

impl<E> Display for AttemptLog<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, record) in self.records.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(
                f,
                "#{} at {}: {}",
                record.attempt,
                record.failed_at.to_rfc3339(),
                record.error
            )?;
        }
        Ok(())
    }
}

/// Errors of a retry runner.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: Debug + Display,
{
    /// `run` was called while a run was in flight.
    #[error("runner is already in use")]
    AlreadyRunning,

    /// Every attempt failed.
    #[error("gave up after {} attempts", .0.len())]
    Exhausted(AttemptLog<E>),
}

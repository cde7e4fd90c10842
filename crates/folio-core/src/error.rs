//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StreamKey;
use crate::unit_of_work::UnitOfWorkState;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A domain operation was attempted in a state that forbids it.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed or out-of-order history while replaying a stream.
    #[error("replay error on {stream}: {reason}")]
    Replay {
        /// The stream being replayed.
        stream: StreamKey,
        /// What was wrong with the history.
        reason: String,
    },

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on {stream}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream: StreamKey,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A stream that must exist has no events.
    #[error("stream not found: {0}")]
    StreamNotFound(StreamKey),

    /// A multi-aggregate commit failed after some streams were appended.
    #[error(
        "partial commit: append to {failed} failed ({cause}); compensated {compensated:?}, uncompensated {uncompensated:?}"
    )]
    PartialCommit {
        /// The stream whose append failed.
        failed: StreamKey,
        /// The error returned by the failed append.
        cause: Box<DomainError>,
        /// Streams whose appends were successfully retracted.
        compensated: Vec<StreamKey>,
        /// Streams whose appends could not be retracted and remain visible.
        uncompensated: Vec<StreamKey>,
    },

    /// Unit of work protocol misuse.
    #[error("invalid unit of work state: cannot {operation} while {state:?}")]
    InvalidUnitOfWorkState {
        /// The state the unit of work was in.
        state: UnitOfWorkState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// An append batch that does not fit the target stream.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// An event with this identifier was already stored.
    #[error("duplicate event: {0}")]
    DuplicateEvent(Uuid),

    /// Payload encoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Whether a well-behaved caller should reload and retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    pub(crate) fn replay(stream: &StreamKey, reason: impl Into<String>) -> Self {
        Self::Replay {
            stream: stream.clone(),
            reason: reason.into(),
        }
    }
}

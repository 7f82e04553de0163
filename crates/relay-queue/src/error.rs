//! Error types for queue operations.

use relay_persistence::PersistenceError;
use thiserror::Error;

/// Errors that can occur during queue operations.
///
/// Losing a claim race is not an error; claim methods return `Ok(None)`.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("response not found: {0}")]
    ResponseNotFound(String),

    /// The record is not in a state that allows the requested transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A thread panicked while holding the queue lock.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

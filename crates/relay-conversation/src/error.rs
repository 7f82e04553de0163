//! Error types for conversation tracking.

use relay_persistence::PersistenceError;
use relay_queue::QueueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversationError {
    /// A branch finished after the pending count already reached zero.
    #[error("conversation {0}: pending count would go negative")]
    PendingUnderflow(String),

    #[error("unknown team: {0}")]
    UnknownTeam(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

pub type Result<T> = std::result::Result<T, ConversationError>;

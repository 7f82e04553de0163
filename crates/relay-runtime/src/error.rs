//! Error types for the runtime crate.

use thiserror::Error;

/// Errors that can occur in the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("queue error: {0}")]
    Queue(#[from] relay_queue::QueueError),

    #[error("conversation error: {0}")]
    Conversation(#[from] relay_conversation::ConversationError),

    #[error("swarm error: {0}")]
    Swarm(#[from] relay_swarm::SwarmError),

    #[error("persistence error: {0}")]
    Persistence(#[from] relay_persistence::PersistenceError),

    /// A turn failed in a way that may succeed when retried.
    #[error("agent error: {0}")]
    Agent(#[from] relay_agent::ExecutorError),

    /// Runtime not started.
    #[error("runtime not started")]
    NotStarted,

    /// Runtime already started.
    #[error("runtime already started")]
    AlreadyStarted,

    #[error("shutdown error: {0}")]
    Shutdown(String),

    /// A lane stopped accepting work.
    #[error("lane closed: {0}")]
    LaneClosed(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

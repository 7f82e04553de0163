//! Error types for swarm jobs.

use std::time::Duration;

use relay_persistence::PersistenceError;
use relay_queue::QueueError;
use thiserror::Error;

use crate::job::JobState;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("unknown swarm: {0}")]
    UnknownSwarm(String),

    /// No input source produced any items.
    #[error("no input items: {0}")]
    NoInput(String),

    #[error("input command failed: {command}: {reason}")]
    InputCommand { command: String, reason: String },

    #[error("input command timed out after {after:?}: {command}")]
    InputTimeout { command: String, after: Duration },

    /// An input command uses `{{name}}` but the trigger supplies no value.
    #[error("no value for parameter {{{{{0}}}}}")]
    UnresolvedParam(String),

    #[error("failed to read input file {path}: {source}")]
    InputFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid job transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl SwarmError {
    /// Errors raised while resolving input. These fail the job; everything
    /// later in the pipeline degrades instead.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SwarmError::NoInput(_)
                | SwarmError::InputCommand { .. }
                | SwarmError::InputTimeout { .. }
                | SwarmError::UnresolvedParam(_)
                | SwarmError::InputFile { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;

//! Error types for event journal access.

use relay_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("malformed journal line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, EventError>;

//! Error types for configuration.

use relay_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Persistence(#[from] PersistenceError),

    /// The settings document is readable but inconsistent.
    #[error("invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

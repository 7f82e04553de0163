//! Error types for agent execution.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The turn did not finish within the executor timeout.
    #[error("agent {agent} timed out after {after:?}")]
    Timeout { agent: String, after: Duration },

    /// The agent process exited unsuccessfully.
    #[error("agent {agent} exited with {code:?}: {stderr}")]
    NonZeroExit {
        agent: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent {agent} i/o error: {source}")]
    Io {
        agent: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutorError {
    /// Whether trying the same turn again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Timeout { .. } | ExecutorError::NonZeroExit { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_variants() {
        let timeout = ExecutorError::Timeout {
            agent: "coder".into(),
            after: Duration::from_secs(120),
        };
        let exit = ExecutorError::NonZeroExit {
            agent: "coder".into(),
            code: Some(1),
            stderr: "boom".into(),
        };
        let spawn = ExecutorError::Spawn {
            program: "missing".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        };

        assert!(timeout.is_retryable());
        assert!(exit.is_retryable());
        assert!(!spawn.is_retryable());
        assert!(exit.to_string().contains("boom"));
    }
}

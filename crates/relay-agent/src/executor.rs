//! The executor interface.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Runs one agent turn.
///
/// Implementations must honour their own timeout and report it as
/// [`ExecutorError::Timeout`](crate::ExecutorError::Timeout); the engine
/// never cancels an invocation.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Sends `prompt` to `agent` and returns its reply text.
    ///
    /// With `reset_context` the agent must not see any earlier turns.
    async fn invoke(&self, prompt: &str, agent: &str, reset_context: bool) -> Result<String>;
}

pub type SharedExecutor = Arc<dyn AgentExecutor>;

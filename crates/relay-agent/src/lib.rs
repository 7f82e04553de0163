//! Agent execution for relay.
//!
//! The engine never talks to a model directly. It hands a prompt to an
//! [`AgentExecutor`] and gets text back, or an [`ExecutorError`] saying the
//! turn timed out or the agent process failed. [`CommandExecutor`] is the
//! stock implementation that runs a configured program per turn.

pub mod command;
pub mod error;
pub mod executor;

pub use command::CommandExecutor;
pub use error::{ExecutorError, Result};
pub use executor::{AgentExecutor, SharedExecutor};

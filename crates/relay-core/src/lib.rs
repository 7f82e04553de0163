//! Shared configuration for relay.
//!
//! - [`config`]: where state lives on disk, `.env` loading
//! - [`settings`]: the JSON settings document and its defaults
//! - [`roster`]: agent, team, and swarm lookups built from settings
//! - [`logging`]: tracing subscriber setup for binaries

pub mod config;
pub mod error;
pub mod logging;
pub mod roster;
pub mod settings;

pub use config::StatePaths;
pub use error::{ConfigError, Result};
pub use roster::{Roster, TeamRef};
pub use settings::{
    AgentSettings, ConversationSettings, DispatchSettings, ExecutorSettings, MultiKeyPolicy,
    OutputSettings, QueueSettings, ReduceSettings, ReduceStrategy, Settings, ShuffleSettings,
    SwarmInputSettings, SwarmSettings, TeamSettings,
};

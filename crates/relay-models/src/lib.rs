//! Core data types for the relay orchestration engine.
//!
//! - [`WorkItem`]: a unit of work addressed to an agent, with its queue state
//! - [`ResponseItem`]: agent output waiting to be delivered back to a channel
//! - Prefixed ID newtypes ([`WorkId`], [`ResponseId`], [`ConversationId`], [`JobId`])

pub mod ids;
pub mod response;
pub mod work;

pub use ids::{ConversationId, JobId, ResponseId, WorkId};
pub use response::{ResponseItem, ResponseMetadata, ResponseStatus};
pub use work::{WorkItem, WorkKind, WorkStatus};

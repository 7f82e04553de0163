//! Multi-agent conversations for relay.
//!
//! When a message is routed to a team, the agents answering it may address
//! each other with `[@teammate: message]` tags. Each tag becomes a new work
//! item for the teammate. The [`ConversationTracker`] counts open branches
//! and, when the last one finishes, sends one combined reply back to
//! whoever started the conversation.

pub mod conversation;
pub mod error;
pub mod mention;
pub mod outbound;
pub mod tracker;

pub use conversation::{AgentReply, Conversation, ConversationState};
pub use error::{ConversationError, Result};
pub use mention::{scan_mentions, Mention, MentionRejection, MentionScan, RejectedMention};
pub use outbound::{collect_file_tags, ResponseShaper};
pub use tracker::{ConversationConfig, ConversationTracker, TurnOutcome};

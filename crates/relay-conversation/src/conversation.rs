//! Conversation state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_models::{ConversationId, WorkItem};

use crate::error::{ConversationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// At least one branch is still in flight.
    Active,
    /// The combined reply has been produced.
    Complete,
}

/// One agent's contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub agent: String,
    pub text: String,
    pub files: Vec<String>,
}

/// A team conversation started by one external message.
///
/// `pending` counts branches (work items) that belong to the conversation
/// and have not finished yet. It starts at 1 for the leader's turn.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub team: String,
    /// The external message that started the conversation.
    pub origin: WorkItem,
    pub pending: u32,
    pub replies: Vec<AgentReply>,
    pub total_messages: u32,
    pub max_messages: u32,
    /// Mentions sent per agent.
    pub outgoing_mentions: HashMap<String, u32>,
    pub started_at: DateTime<Utc>,
    pub state: ConversationState,
}

impl Conversation {
    pub fn new(origin: WorkItem, team: impl Into<String>, max_messages: u32) -> Self {
        Self {
            id: ConversationId::new(),
            team: team.into(),
            origin,
            pending: 1,
            replies: Vec::new(),
            total_messages: 0,
            max_messages,
            outgoing_mentions: HashMap::new(),
            started_at: Utc::now(),
            state: ConversationState::Active,
        }
    }

    /// Stores a reply and counts it toward the message cap.
    pub fn record_reply(&mut self, agent: &str, text: String, files: Vec<String>) {
        self.total_messages += 1;
        self.replies.push(AgentReply {
            agent: agent.to_string(),
            text,
            files,
        });
    }

    /// Whether another round of mentions may be sent.
    pub fn can_fan_out(&self) -> bool {
        self.state == ConversationState::Active && self.total_messages < self.max_messages
    }

    /// Opens `count` new branches sent by `from`.
    pub fn open_branches(&mut self, from: &str, count: u32) {
        self.pending += count;
        *self.outgoing_mentions.entry(from.to_string()).or_insert(0) += count;
    }

    /// Closes one branch. Returns true when this was the last one.
    pub fn close_branch(&mut self) -> Result<bool> {
        self.pending = self
            .pending
            .checked_sub(1)
            .ok_or_else(|| ConversationError::PendingUnderflow(self.id.to_string()))?;
        Ok(self.pending == 0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now.signed_duration_since(self.started_at) > timeout,
            Err(_) => false,
        }
    }

    /// Combined reply text: a single reply unchanged, several replies as
    /// `@agent: text` sections.
    pub fn aggregate(&self) -> String {
        match self.replies.as_slice() {
            [] => String::new(),
            [only] => only.text.clone(),
            many => many
                .iter()
                .map(|r| format!("@{}: {}", r.agent, r.text))
                .collect::<Vec<_>>()
                .join("\n\n------\n\n"),
        }
    }

    /// Every file attached by any reply, without duplicates.
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for file in self.replies.iter().flat_map(|r| r.files.iter()) {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_conversation() -> Conversation {
        Conversation::new(WorkItem::new("discord", "alice", "plan it"), "dev", 15)
    }

    #[test]
    fn test_new_has_one_pending_branch() {
        let conv = make_conversation();
        assert_eq!(conv.pending, 1);
        assert_eq!(conv.state, ConversationState::Active);
    }

    #[test]
    fn test_close_branch_never_goes_negative() {
        let mut conv = make_conversation();
        assert!(conv.close_branch().unwrap());
        assert!(matches!(
            conv.close_branch(),
            Err(ConversationError::PendingUnderflow(_))
        ));
        assert_eq!(conv.pending, 0);
    }

    #[test]
    fn test_fan_out_then_fan_in() {
        let mut conv = make_conversation();
        conv.open_branches("lead", 2);
        assert_eq!(conv.pending, 3);
        assert!(!conv.close_branch().unwrap());
        assert!(!conv.close_branch().unwrap());
        assert!(conv.close_branch().unwrap());
        assert_eq!(conv.outgoing_mentions["lead"], 2);
    }

    #[test]
    fn test_message_cap() {
        let mut conv = Conversation::new(WorkItem::new("http", "a", "x"), "dev", 2);
        conv.record_reply("lead", "one".into(), vec![]);
        assert!(conv.can_fan_out());
        conv.record_reply("coder", "two".into(), vec![]);
        assert!(!conv.can_fan_out());
    }

    #[test]
    fn test_aggregate_single_reply_unchanged() {
        let mut conv = make_conversation();
        conv.record_reply("lead", "just me".into(), vec![]);
        assert_eq!(conv.aggregate(), "just me");
    }

    #[test]
    fn test_aggregate_multiple_replies() {
        let mut conv = make_conversation();
        conv.record_reply("lead", "plan".into(), vec!["/a".into()]);
        conv.record_reply("coder", "code".into(), vec!["/a".into(), "/b".into()]);
        assert_eq!(conv.aggregate(), "@lead: plan\n\n------\n\n@coder: code");
        assert_eq!(conv.files(), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_expiry() {
        let conv = make_conversation();
        let timeout = Duration::from_secs(1800);
        assert!(!conv.is_expired(Utc::now(), timeout));
        assert!(conv.is_expired(Utc::now() + chrono::Duration::minutes(31), timeout));
    }
}

//! Work item types.
//!
//! A work item is one message addressed to an agent. It is owned by the
//! queue store and only changes state through the transitions below:
//!
//! ```text
//! pending ──claim──▶ processing ──complete──▶ completed
//!    ▲                   │
//!    └──retry / stale────┤
//!                        └──retry at ceiling──▶ dead
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, WorkId};

/// Queue state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by exactly one lane.
    Processing,
    /// Finished successfully.
    Completed,
    /// Exhausted its retry budget; kept for inspection.
    Dead,
}

impl WorkStatus {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Dead)
    }
}

/// What kind of turn a work item represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WorkKind {
    /// A message from an external producer.
    #[default]
    Turn,
    /// A message one agent addressed to a teammate inside a conversation.
    Mention {
        conversation_id: ConversationId,
        origin_agent: String,
    },
}

/// A unit of work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: WorkId,

    /// Channel tag of the producer (`discord`, `http`, `manual`, ...).
    pub channel: String,

    /// Display identity of the human sender.
    pub sender: String,

    /// Channel-specific sender address, when the channel has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    pub body: String,

    /// Explicit target agent or team, set by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(flatten)]
    pub kind: WorkKind,

    /// Paths of files attached to the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default)]
    pub status: WorkStatus,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Lane that currently owns the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimant: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Creates a pending turn from an external producer.
    pub fn new(channel: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkId::new(),
            channel: channel.into(),
            sender: sender.into(),
            sender_id: None,
            body: body.into(),
            target: None,
            kind: WorkKind::Turn,
            files: Vec::new(),
            status: WorkStatus::Pending,
            retry_count: 0,
            last_error: None,
            claimant: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a teammate-to-teammate turn derived from `parent`.
    ///
    /// The derived item keeps the parent's channel and sender so the final
    /// conversation response goes back to the original requester.
    pub fn mention(
        parent: &WorkItem,
        conversation_id: ConversationId,
        origin_agent: impl Into<String>,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let mut item = Self::new(parent.channel.clone(), parent.sender.clone(), body);
        item.sender_id = parent.sender_id.clone();
        item.target = Some(target.into());
        item.kind = WorkKind::Mention {
            conversation_id,
            origin_agent: origin_agent.into(),
        };
        item
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Conversation this item belongs to, for mention-derived turns.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match &self.kind {
            WorkKind::Mention { conversation_id, .. } => Some(conversation_id),
            WorkKind::Turn => None,
        }
    }

    /// Agent that sent this item, for mention-derived turns.
    pub fn origin_agent(&self) -> Option<&str> {
        match &self.kind {
            WorkKind::Mention { origin_agent, .. } => Some(origin_agent),
            WorkKind::Turn => None,
        }
    }

    pub fn is_mention(&self) -> bool {
        matches!(self.kind, WorkKind::Mention { .. })
    }

    /// Marks the item as owned by `claimant`.
    pub fn claim(&mut self, claimant: impl Into<String>) {
        self.status = WorkStatus::Processing;
        self.claimant = Some(claimant.into());
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = WorkStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Returns the item to the pending pool without counting a failure.
    pub fn release(&mut self) {
        self.status = WorkStatus::Pending;
        self.claimant = None;
        self.updated_at = Utc::now();
    }

    /// Records a failed attempt.
    ///
    /// The item goes back to pending unless this attempt brings the retry
    /// count to `ceiling`, in which case it becomes dead.
    pub fn record_failure(&mut self, error: impl Into<String>, ceiling: u32) -> WorkStatus {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.claimant = None;
        self.updated_at = Utc::now();
        self.status = if self.retry_count >= ceiling {
            WorkStatus::Dead
        } else {
            WorkStatus::Pending
        };
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_turn_defaults() {
        let item = WorkItem::new("discord", "alice", "hello");
        assert_eq!(item.status, WorkStatus::Pending);
        assert_eq!(item.kind, WorkKind::Turn);
        assert_eq!(item.retry_count, 0);
        assert!(item.conversation_id().is_none());
        assert!(!item.is_mention());
    }

    #[test]
    fn test_mention_inherits_origin() {
        let parent = WorkItem::new("telegram", "bob", "plan the release").with_sender_id("42");
        let conv = ConversationId::from_string("conv-1");
        let item = WorkItem::mention(&parent, conv.clone(), "lead", "coder", "please build it");

        assert_eq!(item.channel, "telegram");
        assert_eq!(item.sender, "bob");
        assert_eq!(item.sender_id.as_deref(), Some("42"));
        assert_eq!(item.target.as_deref(), Some("coder"));
        assert_eq!(item.conversation_id(), Some(&conv));
        assert_eq!(item.origin_agent(), Some("lead"));
    }

    #[test]
    fn test_record_failure_reaches_dead_at_ceiling() {
        let mut item = WorkItem::new("http", "c", "x");
        for _ in 0..4 {
            item.claim("lane");
            assert_eq!(item.record_failure("boom", 5), WorkStatus::Pending);
        }
        item.claim("lane");
        assert_eq!(item.record_failure("boom", 5), WorkStatus::Dead);
        assert_eq!(item.retry_count, 5);
        assert!(item.status.is_terminal());
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let parent = WorkItem::new("http", "carol", "hi");
        let item = WorkItem::mention(&parent, ConversationId::from_string("conv-9"), "lead", "qa", "check");
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["kind"], "mention");
        assert_eq!(json["conversationId"], "conv-9");
        assert_eq!(json["originAgent"], "lead");
        assert_eq!(json["retryCount"], 0);
        assert!(json.get("senderId").is_none());

        let back: WorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, item.kind);
    }

    #[test]
    fn test_minimal_producer_payload() {
        let json = r#"{
            "id": "work-1",
            "channel": "manual",
            "sender": "cli",
            "body": "@coder fix the build",
            "kind": "turn",
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-01T00:00:00Z"
        }"#;
        let item: WorkItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.status, WorkStatus::Pending);
        assert!(item.files.is_empty());
        assert!(item.target.is_none());
    }
}

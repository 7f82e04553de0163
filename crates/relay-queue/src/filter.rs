//! Work item filtering for queries.

use relay_models::{ConversationId, WorkItem, WorkStatus};

/// Filter criteria for listing work items.
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    pub status: Option<WorkStatus>,
    pub channel: Option<String>,
    /// Matches the explicit target, case-insensitively.
    pub target: Option<String>,
    pub conversation_id: Option<ConversationId>,
}

impl WorkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: WorkStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    /// Returns true if the work item matches every set criterion.
    pub fn matches(&self, item: &WorkItem) -> bool {
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }

        if let Some(ref channel) = self.channel {
            if item.channel != *channel {
                return false;
            }
        }

        if let Some(ref target) = self.target {
            match item.target {
                Some(ref t) if t.eq_ignore_ascii_case(target) => {}
                _ => return false,
            }
        }

        if let Some(ref conversation_id) = self.conversation_id {
            if item.conversation_id() != Some(conversation_id) {
                return false;
            }
        }

        true
    }
}

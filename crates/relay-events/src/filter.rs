//! Event filtering for history queries.

use relay_models::{ConversationId, JobId};

use crate::event::LifecycleEvent;

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub conversation_id: Option<ConversationId>,
    pub job_id: Option<JobId>,
    /// Event kind name, e.g. `swarm_batch_done`.
    pub name: Option<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_job(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        if let Some(ref id) = self.conversation_id {
            if event.conversation_id() != Some(id) {
                return false;
            }
        }
        if let Some(ref id) = self.job_id {
            if event.job_id() != Some(id) {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if event.name() != name {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_by_job_and_name() {
        let event = LifecycleEvent::SwarmBatchStarted {
            job_id: JobId::from_string("job-1"),
            batch: 0,
        };
        assert!(EventFilter::new().matches(&event));
        assert!(EventFilter::new().with_job("job-1".into()).matches(&event));
        assert!(!EventFilter::new().with_job("job-2".into()).matches(&event));
        assert!(EventFilter::new().with_name("swarm_batch_started").matches(&event));
        assert!(!EventFilter::new().with_name("job_done").matches(&event));
        assert!(!EventFilter::new().with_conversation("conv-1".into()).matches(&event));
    }
}

//! Lifecycle event types.

use chrono::{DateTime, Utc};
use relay_models::{ConversationId, JobId, WorkId};
use serde::{Deserialize, Serialize};

/// Something observable that happened inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The dispatcher handed a claimed item to a lane.
    ItemRouted {
        work_id: WorkId,
        lane: String,
        agent: String,
    },
    ConversationStarted {
        conversation_id: ConversationId,
        team: String,
        work_id: WorkId,
    },
    /// One agent addressed a teammate.
    ConversationHandoff {
        conversation_id: ConversationId,
        from: String,
        to: String,
    },
    ConversationEnded {
        conversation_id: ConversationId,
        responses: usize,
        timed_out: bool,
    },
    SwarmBatchStarted {
        job_id: JobId,
        batch: usize,
    },
    SwarmBatchDone {
        job_id: JobId,
        batch: usize,
        attempts: u32,
        ok: bool,
    },
    ShuffleDone {
        job_id: JobId,
        partitions: usize,
        skipped_records: usize,
    },
    ReduceDone {
        job_id: JobId,
        strategy: String,
    },
    JobDone {
        job_id: JobId,
        swarm: String,
        succeeded: usize,
        failed: usize,
    },
    JobFailed {
        job_id: JobId,
        swarm: String,
        error: String,
    },
}

impl LifecycleEvent {
    /// Short name of the event kind, as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ItemRouted { .. } => "item_routed",
            LifecycleEvent::ConversationStarted { .. } => "conversation_started",
            LifecycleEvent::ConversationHandoff { .. } => "conversation_handoff",
            LifecycleEvent::ConversationEnded { .. } => "conversation_ended",
            LifecycleEvent::SwarmBatchStarted { .. } => "swarm_batch_started",
            LifecycleEvent::SwarmBatchDone { .. } => "swarm_batch_done",
            LifecycleEvent::ShuffleDone { .. } => "shuffle_done",
            LifecycleEvent::ReduceDone { .. } => "reduce_done",
            LifecycleEvent::JobDone { .. } => "job_done",
            LifecycleEvent::JobFailed { .. } => "job_failed",
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            LifecycleEvent::ConversationStarted { conversation_id, .. }
            | LifecycleEvent::ConversationHandoff { conversation_id, .. }
            | LifecycleEvent::ConversationEnded { conversation_id, .. } => Some(conversation_id),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            LifecycleEvent::SwarmBatchStarted { job_id, .. }
            | LifecycleEvent::SwarmBatchDone { job_id, .. }
            | LifecycleEvent::ShuffleDone { job_id, .. }
            | LifecycleEvent::ReduceDone { job_id, .. }
            | LifecycleEvent::JobDone { job_id, .. }
            | LifecycleEvent::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Batch index, for swarm batch events.
    pub fn batch(&self) -> Option<usize> {
        match self {
            LifecycleEvent::SwarmBatchStarted { batch, .. }
            | LifecycleEvent::SwarmBatchDone { batch, .. } => Some(*batch),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::JobFailed { .. } | LifecycleEvent::SwarmBatchDone { ok: false, .. }
        )
    }
}

/// An event stamped with the time it was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

impl Envelope {
    pub fn now(event: LifecycleEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

//! Swarm job state.

use chrono::{DateTime, Utc};
use relay_models::JobId;

use crate::error::{Result, SwarmError};

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    InputResolved,
    Splitting,
    Mapping,
    Shuffling,
    Reducing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Whether the pipeline may move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Created, InputResolved)
            | (InputResolved, Splitting)
            | (Splitting, Mapping)
            | (Mapping, Shuffling)
            | (Mapping, Reducing)
            | (Shuffling, Reducing)
            | (Reducing, Done) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Done,
    Failed,
}

/// One slice of the job's items, processed by a single agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position in the job.
    pub index: usize,
    pub items: Vec<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub status: BatchStatus,
}

impl Batch {
    pub fn new(index: usize, items: Vec<String>) -> Self {
        Self {
            index,
            items,
            result: None,
            error: None,
            attempts: 0,
            status: BatchStatus::Pending,
        }
    }

    pub fn succeed(&mut self, result: String, attempts: u32) {
        self.result = Some(result);
        self.error = None;
        self.attempts = attempts;
        self.status = BatchStatus::Done;
    }

    pub fn fail(&mut self, error: String, attempts: u32) {
        self.result = None;
        self.error = Some(error);
        self.attempts = attempts;
        self.status = BatchStatus::Failed;
    }

    pub fn is_done(&self) -> bool {
        self.status == BatchStatus::Done
    }
}

/// One run of a swarm, from trigger to final output.
#[derive(Debug, Clone)]
pub struct SwarmJob {
    pub id: JobId,
    pub swarm: String,
    pub items: Vec<String>,
    /// Items left out because the input exceeded the item limit.
    pub skipped_items: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub batches: Vec<Batch>,
    pub state: JobState,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SwarmJob {
    pub fn new(swarm: impl Into<String>, batch_size: usize, concurrency: usize) -> Self {
        Self {
            id: JobId::new(),
            swarm: swarm.into(),
            items: Vec::new(),
            skipped_items: 0,
            batch_size,
            concurrency,
            batches: Vec::new(),
            state: JobState::Created,
            error: None,
            started_at: Utc::now(),
        }
    }

    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SwarmError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
        }
        self.error = Some(error.into());
    }

    pub fn succeeded(&self) -> usize {
        self.batches.iter().filter(|b| b.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = SwarmJob::new("triage", 25, 5);
        for next in [
            JobState::InputResolved,
            JobState::Splitting,
            JobState::Mapping,
            JobState::Shuffling,
            JobState::Reducing,
            JobState::Done,
        ] {
            job.advance(next).unwrap();
        }
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_shuffle_is_optional() {
        let mut job = SwarmJob::new("triage", 25, 5);
        job.advance(JobState::InputResolved).unwrap();
        job.advance(JobState::Splitting).unwrap();
        job.advance(JobState::Mapping).unwrap();
        job.advance(JobState::Reducing).unwrap();
        job.advance(JobState::Done).unwrap();
    }

    #[test]
    fn test_invalid_transition() {
        let mut job = SwarmJob::new("triage", 25, 5);
        assert!(matches!(
            job.advance(JobState::Mapping),
            Err(SwarmError::InvalidTransition { from: JobState::Created, to: JobState::Mapping })
        ));
    }

    #[test]
    fn test_fail_from_any_stage_but_not_after_done() {
        let mut job = SwarmJob::new("triage", 25, 5);
        job.advance(JobState::InputResolved).unwrap();
        job.fail("boom");
        assert_eq!(job.state, JobState::Failed);
        assert!(job.advance(JobState::Failed).is_err());

        let mut done = SwarmJob::new("triage", 25, 5);
        done.state = JobState::Done;
        done.fail("late");
        assert_eq!(done.state, JobState::Done);
    }

    #[test]
    fn test_batch_counts() {
        let mut job = SwarmJob::new("triage", 2, 5);
        let mut a = Batch::new(0, vec!["x".into()]);
        a.succeed("ok".into(), 1);
        let mut b = Batch::new(1, vec!["y".into()]);
        b.fail("bad".into(), 3);
        job.batches = vec![a, b, Batch::new(2, vec![])];
        assert_eq!(job.succeeded(), 1);
        assert_eq!(job.failed(), 1);
    }
}

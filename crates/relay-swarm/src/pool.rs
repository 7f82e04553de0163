//! Bounded worker pool.
//!
//! Runs a list of prompts against one agent with at most `concurrency`
//! calls in flight. Every call starts from a fresh agent context. A failed
//! call is retried with exponential backoff; a task that still fails is
//! reported as failed without affecting the others.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use relay_agent::{ExecutorError, SharedExecutor};
use relay_core::SwarmSettings;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Wait before the first retry; doubled for each one after.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&SwarmSettings> for RetryPolicy {
    fn from(settings: &SwarmSettings) -> Self {
        Self::new(settings.batch_retries, Duration::from_millis(settings.retry_delay_ms))
    }
}

/// Result of one pool task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Position of the prompt in the submitted list.
    pub index: usize,
    pub output: Result<String, String>,
    pub attempts: u32,
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        self.output.is_ok()
    }
}

/// Hooks called as tasks start and finish.
pub trait PoolObserver: Send + Sync {
    fn started(&self, _index: usize) {}

    /// `completed` counts finished tasks including this one.
    fn finished(&self, _outcome: &TaskOutcome, _completed: usize, _total: usize) {}
}

/// Observer that ignores everything.
pub struct Quiet;

impl PoolObserver for Quiet {}

#[derive(Clone)]
pub struct WorkerPool {
    executor: SharedExecutor,
    agent: String,
    concurrency: usize,
    retry: RetryPolicy,
}

impl WorkerPool {
    pub fn new(executor: SharedExecutor, agent: impl Into<String>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            executor,
            agent: agent.into(),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// One prompt with retries. Returns the last result and the number of
    /// attempts made.
    pub async fn invoke(&self, prompt: &str) -> (Result<String, ExecutorError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.executor.invoke(prompt, &self.agent, true).await {
                Ok(text) => return (Ok(text), attempt),
                Err(e) if e.is_retryable() && attempt <= self.retry.retries => {
                    let delay = self.retry.delay_before(attempt);
                    warn!(agent = %self.agent, attempt, ?delay, error = %e, "swarm call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(agent = %self.agent, attempt, error = %e, "swarm call failed");
                    return (Err(e), attempt);
                }
            }
        }
    }

    /// Runs every prompt and returns the outcomes in submission order.
    pub async fn run(&self, prompts: Vec<String>, observer: &dyn PoolObserver) -> Vec<TaskOutcome> {
        let total = prompts.len();
        let semaphore = Semaphore::new(self.concurrency);
        let completed = AtomicUsize::new(0);
        debug!(agent = %self.agent, total, concurrency = self.concurrency, "starting pool");

        let tasks = prompts.into_iter().enumerate().map(|(index, prompt)| {
            let semaphore = &semaphore;
            let completed = &completed;
            async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => {
                        observer.started(index);
                        let (result, attempts) = self.invoke(&prompt).await;
                        TaskOutcome {
                            index,
                            output: result.map_err(|e| e.to_string()),
                            attempts,
                        }
                    }
                    Err(e) => TaskOutcome {
                        index,
                        output: Err(e.to_string()),
                        attempts: 0,
                    },
                };
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                observer.finished(&outcome, done, total);
                outcome
            }
        });

        join_all(tasks).await
    }
}

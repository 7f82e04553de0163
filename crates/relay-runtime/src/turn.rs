//! Running one claimed work item to completion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_agent::SharedExecutor;
use relay_conversation::{ConversationTracker, ResponseShaper, TurnOutcome};
use relay_models::{ConversationId, ResponseItem, WorkItem, WorkStatus};
use relay_queue::QueueStore;
use relay_swarm::SwarmEngine;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::lane::{LaneHandler, LaneJob};
use crate::routing::{LaneKey, Route};

/// Sent when a turn cannot produce a reply.
pub const APOLOGY: &str = "Sorry, I encountered an error processing your request.";

/// Trailing note for a teammate whose conversation still has other
/// branches in flight.
pub fn pending_indicator(others: u32) -> String {
    format!(
        "\n\n------\n\n[{} other teammate response(s) are still being processed and will be delivered when ready. Do not re-mention teammates who haven't responded yet.]",
        others
    )
}

/// How a turn ended, before the queue transition.
enum Disposition {
    /// The item is finished.
    Done,
    /// Something outside the agent failed; the item should be retried.
    Retry(String),
}

/// Executes routed items for every lane.
pub struct TurnProcessor {
    queue: Arc<QueueStore>,
    executor: SharedExecutor,
    tracker: Arc<ConversationTracker>,
    swarms: Arc<SwarmEngine>,
    shaper: ResponseShaper,
    resets: Mutex<HashSet<String>>,
    heartbeat: Duration,
}

impl TurnProcessor {
    pub fn new(
        queue: Arc<QueueStore>,
        executor: SharedExecutor,
        tracker: Arc<ConversationTracker>,
        swarms: Arc<SwarmEngine>,
        shaper: ResponseShaper,
        heartbeat: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            tracker,
            swarms,
            shaper,
            resets: Mutex::new(HashSet::new()),
            heartbeat,
        }
    }

    /// The next ordinary turn for `agent` starts with a fresh context.
    pub fn request_reset(&self, agent: &str) {
        if let Ok(mut resets) = self.resets.lock() {
            resets.insert(agent.to_lowercase());
        }
    }

    fn take_reset(&self, agent: &str) -> bool {
        self.resets
            .lock()
            .map(|mut r| r.remove(&agent.to_lowercase()))
            .unwrap_or(false)
    }

    /// Processes `job` while refreshing its claim, then records the queue
    /// transition.
    pub async fn process(&self, job: &LaneJob) {
        let id = &job.item.id;
        match self.queue.touch(id, &job.claimant) {
            Ok(true) => {}
            Ok(false) => {
                debug!(work_id = %id, "claim lost before processing, skipping");
                return;
            }
            Err(e) => {
                warn!(work_id = %id, error = %e, "cannot confirm claim, skipping");
                return;
            }
        }

        let disposition = {
            let work = self.run(job);
            tokio::pin!(work);
            let mut ticker = tokio::time::interval(self.heartbeat);
            ticker.tick().await;
            loop {
                tokio::select! {
                    disposition = &mut work => break disposition,
                    _ = ticker.tick() => self.heartbeat(job),
                }
            }
        };

        match disposition {
            Disposition::Done => {
                if let Err(e) = self.queue.complete(id) {
                    warn!(work_id = %id, error = %e, "failed to complete work item");
                }
            }
            Disposition::Retry(reason) => self.retry(&job.item, &reason),
        }
    }

    fn heartbeat(&self, job: &LaneJob) {
        match self.queue.touch(&job.item.id, &job.claimant) {
            Ok(true) => {}
            Ok(false) => warn!(work_id = %job.item.id, "claim lost while processing"),
            Err(e) => warn!(work_id = %job.item.id, error = %e, "heartbeat failed"),
        }
    }

    fn retry(&self, item: &WorkItem, reason: &str) {
        match self.queue.retry(&item.id, reason) {
            Ok(WorkStatus::Dead) => {
                error!(work_id = %item.id, error = reason, "work item is dead");
                if let Some(conversation_id) = item.conversation_id() {
                    let agent = item.target.as_deref().unwrap_or("agent");
                    if let Err(e) = self.tracker.on_reply(conversation_id, agent, APOLOGY) {
                        error!(conversation_id = %conversation_id, error = %e, "failed to close dead branch");
                    }
                } else {
                    self.deliver(item, None, APOLOGY);
                }
            }
            Ok(status) => debug!(work_id = %item.id, ?status, "work item will be retried"),
            Err(e) => error!(work_id = %item.id, error = %e, "failed to record retry"),
        }
    }

    /// Enqueues a reply straight to the item's channel.
    fn deliver(&self, item: &WorkItem, agent: Option<&str>, raw: &str) {
        let stem = agent.unwrap_or("reply");
        let (body, files) = self.shaper.shape_or_inline(stem, raw);
        let mut response = ResponseItem::reply_to(item, body).with_files(files);
        if let Some(agent) = agent {
            response = response.with_agent(agent);
        }
        if let Err(e) = self.queue.enqueue_response(response) {
            error!(work_id = %item.id, error = %e, "failed to enqueue response");
        }
    }

    async fn run(&self, job: &LaneJob) -> Disposition {
        let result = match &job.route {
            Route::Agent { agent, team, message } => {
                self.ordinary_turn(&job.item, agent, team.as_deref(), message).await
            }
            Route::Mention {
                agent,
                conversation_id,
            } => self.mention_turn(&job.item, agent, conversation_id).await,
            Route::Swarm { swarm, trigger } => self.swarm_turn(&job.item, swarm, trigger).await,
        };
        match result {
            Ok(()) => Disposition::Done,
            Err(e) => {
                warn!(work_id = %job.item.id, error = %e, "work item failed");
                Disposition::Retry(e.to_string())
            }
        }
    }

    async fn ordinary_turn(
        &self,
        item: &WorkItem,
        agent: &str,
        team: Option<&str>,
        message: &str,
    ) -> Result<()> {
        let reset = self.take_reset(agent);
        let reply = match self.executor.invoke(message, agent, reset).await {
            Ok(reply) => reply,
            Err(e) if e.is_retryable() => {
                if reset {
                    // The retried turn still starts fresh.
                    self.request_reset(agent);
                }
                return Err(e.into());
            }
            Err(e) => {
                error!(work_id = %item.id, agent, error = %e, "agent turn failed");
                self.deliver(item, Some(agent), APOLOGY);
                return Ok(());
            }
        };

        let Some(team) = team else {
            self.deliver(item, Some(agent), &reply);
            return Ok(());
        };

        // The conversation only exists once the leader's turn has a reply,
        // so a failed turn never leaves a half-open conversation behind.
        let conversation_id = self.tracker.start(item, team)?;
        self.conversation_reply(item, &conversation_id, agent, &reply)
    }

    async fn mention_turn(
        &self,
        item: &WorkItem,
        agent: &str,
        conversation_id: &ConversationId,
    ) -> Result<()> {
        let mut prompt = item.body.clone();
        if let Some(others) = self.tracker.pending_others(conversation_id).filter(|n| *n > 0) {
            prompt.push_str(&pending_indicator(others));
        }

        let reply = match self.executor.invoke(&prompt, agent, false).await {
            Ok(reply) => reply,
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                error!(work_id = %item.id, agent, conversation_id = %conversation_id, error = %e, "teammate turn failed");
                APOLOGY.to_string()
            }
        };
        self.conversation_reply(item, conversation_id, agent, &reply)
    }

    fn conversation_reply(
        &self,
        item: &WorkItem,
        conversation_id: &ConversationId,
        agent: &str,
        reply: &str,
    ) -> Result<()> {
        match self.tracker.on_reply(conversation_id, agent, reply)? {
            TurnOutcome::Orphaned => {
                info!(conversation_id = %conversation_id, agent, "conversation already closed, delivering reply directly");
                self.deliver(item, Some(agent), reply);
            }
            TurnOutcome::Continuing { derived, pending } => {
                debug!(conversation_id = %conversation_id, agent, derived, pending, "branch finished");
            }
            TurnOutcome::Completed { response_id } => {
                debug!(conversation_id = %conversation_id, response_id = %response_id, "conversation delivered");
            }
        }
        Ok(())
    }

    async fn swarm_turn(&self, item: &WorkItem, swarm: &str, trigger: &str) -> Result<()> {
        let report = self.swarms.run(swarm, item, trigger).await?;
        info!(
            job_id = %report.job_id,
            swarm = %report.swarm,
            state = ?report.state,
            succeeded = report.succeeded,
            failed = report.failed,
            "swarm job finished"
        );
        Ok(())
    }
}

#[async_trait]
impl LaneHandler for TurnProcessor {
    async fn handle(&self, lane: &LaneKey, job: LaneJob) {
        debug!(lane = %lane, work_id = %job.item.id, "turn started");
        self.process(&job).await;
    }
}

//! Dispatcher - claims pending work and hands it to lanes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay_agent::SharedExecutor;
use relay_conversation::{ConversationTracker, ResponseShaper};
use relay_core::Roster;
use relay_events::{EventBus, LifecycleEvent};
use relay_persistence::ArtifactStore;
use relay_queue::QueueStore;
use relay_swarm::SwarmEngine;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::lane::{LaneJob, Lanes};
use crate::routing::Router;
use crate::turn::TurnProcessor;

pub struct Dispatcher {
    queue: Arc<QueueStore>,
    router: Router,
    lanes: Lanes<TurnProcessor>,
    tracker: Arc<ConversationTracker>,
    events: EventBus,
    config: RuntimeConfig,
    instance: String,
    claims: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        config: RuntimeConfig,
        queue: Arc<QueueStore>,
        executor: SharedExecutor,
        roster: Arc<Roster>,
        events: EventBus,
    ) -> Self {
        let artifacts = config.files_dir.clone().map(ArtifactStore::new);
        let shaper = match &artifacts {
            Some(store) => ResponseShaper::new(
                store.clone(),
                config.swarm.max_inline_chars,
                config.swarm.preview_chars,
            ),
            None => ResponseShaper::default(),
        };

        let tracker = Arc::new(
            ConversationTracker::new(
                Arc::clone(&queue),
                events.clone(),
                Arc::clone(&roster),
                config.conversation.clone(),
            )
            .with_shaper(shaper.clone()),
        );

        let mut swarms = SwarmEngine::new(
            Arc::clone(&executor),
            Arc::clone(&queue),
            events.clone(),
            Arc::clone(&roster),
            config.swarm.clone(),
        );
        if let Some(store) = artifacts {
            swarms = swarms.with_artifacts(store);
        }

        let processor = TurnProcessor::new(
            Arc::clone(&queue),
            executor,
            Arc::clone(&tracker),
            Arc::new(swarms),
            shaper,
            config.heartbeat_interval(),
        );

        Self {
            queue,
            router: Router::new(roster),
            lanes: Lanes::new(Arc::new(processor)),
            tracker,
            events,
            config,
            instance: format!("dispatcher-{}", std::process::id()),
            claims: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<ConversationTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Every claim gets its own token, so a stale sweep followed by a
    /// re-claim is never mistaken for the original owner.
    fn next_claimant(&self) -> String {
        let n = self.claims.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.instance, n)
    }

    /// The next ordinary turn for `agent` starts with a fresh context.
    pub fn request_reset(&self, agent: &str) {
        let agent = self.router.roster().agent(agent).unwrap_or(agent);
        info!(agent, "context reset requested");
        self.lanes.handler().request_reset(agent);
    }

    /// Claims every pending item and routes it to its lane. Returns the
    /// number of items dispatched.
    pub fn dispatch_pending(&self) -> Result<usize> {
        let mut dispatched = 0;
        loop {
            let claimant = self.next_claimant();
            let Some(item) = self.queue.claim(&claimant)? else {
                break;
            };

            let route = self.router.route(&item);
            let lane = route.lane();
            debug!(work_id = %item.id, lane = %lane, "routing work item");
            self.events.emit(LifecycleEvent::ItemRouted {
                work_id: item.id.clone(),
                lane: lane.to_string(),
                agent: route.identity().to_string(),
            });

            let work_id = item.id.clone();
            if let Err(e) = self.lanes.submit(
                lane,
                LaneJob {
                    item,
                    route,
                    claimant,
                },
            ) {
                error!(work_id = %work_id, error = %e, "failed to hand item to lane");
                self.queue.retry(&work_id, &e.to_string())?;
                continue;
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Runs the claim loop until `shutdown` flips to true.
    ///
    /// The loop wakes on every enqueue and at least once per poll interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let wake = self.queue.wake_handle();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(poll_interval = ?self.config.poll_interval, "dispatcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.dispatch_pending() {
                Ok(0) => {}
                Ok(n) => debug!(dispatched = n, "dispatched work items"),
                Err(e) => warn!(error = %e, "dispatch pass failed"),
            }

            tokio::select! {
                _ = wake.notified() => {}
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("dispatcher stopped");
    }

    /// Waits for every lane to finish what it has already accepted.
    pub async fn drain(&self) -> Result<()> {
        self.lanes.close().await
    }
}

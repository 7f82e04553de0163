//! Periodic maintenance: stale claims and expired conversations.

use std::sync::Arc;
use std::time::Duration;

use relay_conversation::ConversationTracker;
use relay_queue::QueueStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub work: usize,
    pub deliveries: usize,
    pub conversations: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.work == 0 && self.deliveries == 0 && self.conversations == 0
    }
}

pub struct Sweeper {
    queue: Arc<QueueStore>,
    tracker: Arc<ConversationTracker>,
    stale_threshold: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        queue: Arc<QueueStore>,
        tracker: Arc<ConversationTracker>,
        stale_threshold: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            tracker,
            stale_threshold,
            interval,
        }
    }

    pub fn sweep_once(&self) -> Result<SweepReport> {
        let stale = self.queue.recover_stale(self.stale_threshold)?;
        let expired = self.tracker.expire()?;
        let report = SweepReport {
            work: stale.work,
            deliveries: stale.deliveries,
            conversations: expired.len(),
        };
        if !report.is_empty() {
            info!(
                work = report.work,
                deliveries = report.deliveries,
                conversations = report.conversations,
                "maintenance sweep recovered items"
            );
        }
        Ok(report)
    }

    /// Sweeps every interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        debug!(interval = ?self.interval, "sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once() {
                        warn!(error = %e, "maintenance sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("sweeper stopped");
    }
}

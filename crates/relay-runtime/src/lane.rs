//! Sequential per-identity lanes.
//!
//! Each lane is an unbounded FIFO with a single consumer task, created on
//! first use. Jobs in one lane run strictly one after another; different
//! lanes run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use relay_models::WorkItem;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Result, RuntimeError};
use crate::routing::{LaneKey, Route};

/// A claimed item waiting in a lane.
#[derive(Debug, Clone)]
pub struct LaneJob {
    pub item: WorkItem,
    pub route: Route,
    /// Claim token the item was claimed with.
    pub claimant: String,
}

/// Processes one job at a time for a lane.
#[async_trait]
pub trait LaneHandler: Send + Sync + 'static {
    async fn handle(&self, lane: &LaneKey, job: LaneJob);
}

struct Lane {
    tx: mpsc::UnboundedSender<LaneJob>,
    handle: JoinHandle<()>,
}

pub struct Lanes<H: LaneHandler> {
    handler: Arc<H>,
    lanes: Mutex<HashMap<LaneKey, Lane>>,
}

impl<H: LaneHandler> Lanes<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<LaneKey, Lane>>> {
        self.lanes
            .lock()
            .map_err(|e| RuntimeError::LaneClosed(format!("lane map poisoned: {}", e)))
    }

    fn spawn_lane(&self, key: &LaneKey) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<LaneJob>();
        let handler = Arc::clone(&self.handler);
        let lane_key = key.clone();
        let handle = tokio::spawn(async move {
            debug!(lane = %lane_key, "lane started");
            while let Some(job) = rx.recv().await {
                trace!(lane = %lane_key, work_id = %job.item.id, "lane processing");
                handler.handle(&lane_key, job).await;
            }
            debug!(lane = %lane_key, "lane stopped");
        });
        Lane { tx, handle }
    }

    /// Appends `job` to the lane for `key`, starting the lane if needed.
    pub fn submit(&self, key: LaneKey, job: LaneJob) -> Result<()> {
        let mut lanes = self.lock()?;

        let job = match lanes.get(&key) {
            Some(lane) => match lane.tx.send(job) {
                Ok(()) => return Ok(()),
                // The consumer is gone (it panicked); start a fresh lane.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let lane = self.spawn_lane(&key);
        lane.tx
            .send(job)
            .map_err(|_| RuntimeError::LaneClosed(key.to_string()))?;
        lanes.insert(key, lane);
        Ok(())
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Stops accepting work and waits for every lane to drain.
    pub async fn close(&self) -> Result<()> {
        let lanes: Vec<(LaneKey, Lane)> = self.lock()?.drain().collect();
        for (key, lane) in lanes {
            drop(lane.tx);
            if let Err(e) = lane.handle.await {
                return Err(RuntimeError::Shutdown(format!("lane {} panicked: {}", key, e)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(String, String, &'static str)>>,
    }

    #[async_trait]
    impl LaneHandler for Recorder {
        async fn handle(&self, lane: &LaneKey, job: LaneJob) {
            self.log
                .lock()
                .unwrap()
                .push((lane.to_string(), job.item.body.clone(), "start"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.log
                .lock()
                .unwrap()
                .push((lane.to_string(), job.item.body.clone(), "end"));
        }
    }

    fn job(body: &str, agent: &str) -> LaneJob {
        LaneJob {
            item: WorkItem::new("test", "alice", body),
            route: Route::Agent {
                agent: agent.into(),
                team: None,
                message: body.into(),
            },
            claimant: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_same_lane_is_sequential() {
        let recorder = Arc::new(Recorder::default());
        let lanes = Lanes::new(Arc::clone(&recorder));
        let key = LaneKey::Agent("coder".into());

        for body in ["one", "two", "three"] {
            lanes.submit(key.clone(), job(body, "coder")).unwrap();
        }
        lanes.close().await.unwrap();

        let log = recorder.log.lock().unwrap();
        let order: Vec<_> = log.iter().map(|(_, b, p)| format!("{b}:{p}")).collect();
        assert_eq!(
            order,
            vec!["one:start", "one:end", "two:start", "two:end", "three:start", "three:end"]
        );
    }

    #[tokio::test]
    async fn test_different_lanes_overlap() {
        let recorder = Arc::new(Recorder::default());
        let lanes = Lanes::new(Arc::clone(&recorder));

        lanes.submit(LaneKey::Agent("coder".into()), job("a", "coder")).unwrap();
        lanes.submit(LaneKey::Agent("writer".into()), job("b", "writer")).unwrap();
        assert_eq!(lanes.lane_count(), 2);
        lanes.close().await.unwrap();

        let log = recorder.log.lock().unwrap();
        let phases: Vec<_> = log.iter().map(|(_, _, p)| *p).collect();
        // Both lanes start before either finishes.
        assert_eq!(phases, vec!["start", "start", "end", "end"]);
    }

    #[tokio::test]
    async fn test_close_drains_and_empties() {
        let recorder = Arc::new(Recorder::default());
        let lanes = Lanes::new(Arc::clone(&recorder));
        lanes.submit(LaneKey::Swarm("triage".into()), job("x", "triage")).unwrap();
        lanes.close().await.unwrap();

        assert_eq!(lanes.lane_count(), 0);
        assert_eq!(recorder.log.lock().unwrap().len(), 2);
    }
}

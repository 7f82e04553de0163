//! QueueStore - the single source of truth for work and response records.
//!
//! All state lives in one `Arc<Mutex<QueueState>>`. A transition checks
//! the current state, mutates the record, and writes it through to the
//! record store before the lock is released, so no two callers can
//! observe or persist conflicting versions of the same record.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_models::{
    ResponseId, ResponseItem, ResponseStatus, WorkId, WorkItem, WorkStatus,
};
use relay_persistence::RecordStore;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::filter::WorkFilter;

/// FIFO key for pending records: creation time, then id.
type OrderKey<I> = (DateTime<Utc>, I);

struct QueueState {
    work: HashMap<WorkId, WorkItem>,
    pending_work: BTreeSet<OrderKey<WorkId>>,
    responses: HashMap<ResponseId, ResponseItem>,
    pending_responses: BTreeSet<OrderKey<ResponseId>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            work: HashMap::new(),
            pending_work: BTreeSet::new(),
            responses: HashMap::new(),
            pending_responses: BTreeSet::new(),
        }
    }

    fn insert_work(&mut self, item: WorkItem) {
        if item.status == WorkStatus::Pending {
            self.pending_work.insert((item.created_at, item.id.clone()));
        }
        self.work.insert(item.id.clone(), item);
    }

    fn insert_response(&mut self, item: ResponseItem) {
        if item.status == ResponseStatus::Pending {
            self.pending_responses.insert((item.created_at, item.id.clone()));
        }
        self.responses.insert(item.id.clone(), item);
    }
}

/// Number of records per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub dead: usize,
    pub responses_pending: usize,
    pub responses_delivering: usize,
    pub responses_acked: usize,
}

/// Result of a stale-claim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleSweep {
    /// Work items returned from processing to pending.
    pub work: usize,
    /// Responses returned from delivering to pending.
    pub deliveries: usize,
}

impl StaleSweep {
    pub fn is_empty(&self) -> bool {
        self.work == 0 && self.deliveries == 0
    }
}

/// Thread-safe work and response queue.
///
/// The store is cheap to share behind an `Arc`; every method takes
/// `&self`. Producers call [`enqueue`](Self::enqueue), the dispatcher
/// calls [`claim`](Self::claim) and the completion methods, and channel
/// consumers use the response side.
pub struct QueueStore {
    records: Option<RecordStore>,
    config: QueueConfig,
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
}

impl QueueStore {
    /// Opens a persistent queue, reloading every record found in `records`.
    ///
    /// Items that were processing when the previous process stopped stay
    /// processing until [`recover_stale`](Self::recover_stale) returns them.
    pub fn open(records: RecordStore, config: QueueConfig) -> Result<Self> {
        let mut state = QueueState::new();
        for item in records.list_work()? {
            state.insert_work(item);
        }
        for item in records.list_responses()? {
            state.insert_response(item);
        }
        info!(
            path = %records.base_path().display(),
            work = state.work.len(),
            responses = state.responses.len(),
            "opened queue store"
        );

        Ok(Self {
            records: Some(records),
            config,
            state: Arc::new(Mutex::new(state)),
            wake: Arc::new(Notify::new()),
        })
    }

    /// Creates a queue that keeps records in memory only.
    pub fn in_memory(config: QueueConfig) -> Self {
        Self {
            records: None,
            config,
            state: Arc::new(Mutex::new(QueueState::new())),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Handle that is notified whenever new work is enqueued or returned
    /// to pending.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))
    }

    fn persist_work(&self, item: &WorkItem) -> Result<()> {
        if let Some(records) = &self.records {
            records.save_work(item)?;
        }
        Ok(())
    }

    fn persist_response(&self, item: &ResponseItem) -> Result<()> {
        if let Some(records) = &self.records {
            records.save_response(item)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Work side
    // ------------------------------------------------------------------

    /// Adds a work item in the pending state.
    ///
    /// The record is persisted before it becomes visible to claimers.
    pub fn enqueue(&self, mut item: WorkItem) -> Result<WorkId> {
        item.status = WorkStatus::Pending;
        item.claimant = None;
        let id = item.id.clone();

        {
            let mut state = self.lock()?;
            if state.work.contains_key(&id) {
                return Err(QueueError::InvalidState(format!("work item {} already exists", id)));
            }
            self.persist_work(&item)?;
            state.insert_work(item);
        }

        debug!(work_id = %id, "enqueued work item");
        self.wake.notify_one();
        Ok(id)
    }

    /// Claims the oldest pending work item for `claimant`.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    pub fn claim(&self, claimant: &str) -> Result<Option<WorkItem>> {
        let mut state = self.lock()?;
        let Some(key) = state.pending_work.first().cloned() else {
            return Ok(None);
        };
        self.claim_locked(&mut state, &key.1, claimant)
    }

    /// Claims one specific work item.
    ///
    /// When several callers race for the same item exactly one receives
    /// it; the others get `Ok(None)`.
    pub fn claim_item(&self, id: &WorkId, claimant: &str) -> Result<Option<WorkItem>> {
        let mut state = self.lock()?;
        if !state.work.contains_key(id) {
            return Err(QueueError::NotFound(id.to_string()));
        }
        self.claim_locked(&mut state, id, claimant)
    }

    fn claim_locked(
        &self,
        state: &mut QueueState,
        id: &WorkId,
        claimant: &str,
    ) -> Result<Option<WorkItem>> {
        let Some(item) = state.work.get(id) else {
            return Ok(None);
        };
        if item.status != WorkStatus::Pending {
            trace!(work_id = %id, status = ?item.status, claimant, "claim conflict");
            return Ok(None);
        }

        let mut claimed = item.clone();
        claimed.claim(claimant);
        self.persist_work(&claimed)?;

        state.pending_work.remove(&(claimed.created_at, id.clone()));
        state.work.insert(id.clone(), claimed.clone());
        trace!(work_id = %id, claimant, "claimed work item");
        Ok(Some(claimed))
    }

    /// Confirms that `claimant` still owns `id` and refreshes its claim
    /// time. Returns false if the claim was lost (for example to a stale
    /// sweep), in which case the caller must not process the item.
    pub fn touch(&self, id: &WorkId, claimant: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let item = state
            .work
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if item.status != WorkStatus::Processing || item.claimant.as_deref() != Some(claimant) {
            return Ok(false);
        }
        item.updated_at = Utc::now();
        let snapshot = item.clone();
        self.persist_work(&snapshot)?;
        Ok(true)
    }

    /// Marks a processing item as completed.
    pub fn complete(&self, id: &WorkId) -> Result<()> {
        let mut state = self.lock()?;
        let item = state
            .work
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if item.status != WorkStatus::Processing {
            return Err(QueueError::InvalidState(format!(
                "cannot complete work item in {:?} state",
                item.status
            )));
        }

        let mut updated = item.clone();
        updated.complete();
        self.persist_work(&updated)?;
        *item = updated;

        debug!(work_id = %id, "completed work item");
        Ok(())
    }

    /// Records a failed attempt on a processing item.
    ///
    /// The item goes back to pending, or to dead once its retry count
    /// reaches the configured ceiling. Retrying an item that is not
    /// processing (including a dead one) is rejected.
    pub fn retry(&self, id: &WorkId, error: &str) -> Result<WorkStatus> {
        let status = {
            let mut state = self.lock()?;
            let item = state
                .work
                .get(id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            if item.status != WorkStatus::Processing {
                return Err(QueueError::InvalidState(format!(
                    "cannot retry work item in {:?} state",
                    item.status
                )));
            }

            let mut updated = item.clone();
            let status = updated.record_failure(error, self.config.max_retries);
            self.persist_work(&updated)?;
            state.insert_work(updated);
            status
        };

        match status {
            WorkStatus::Dead => {
                warn!(work_id = %id, error, "work item exhausted retries, moved to dead letters")
            }
            _ => {
                debug!(work_id = %id, error, "work item returned to pending for retry");
                self.wake.notify_one();
            }
        }
        Ok(status)
    }

    /// Returns processing items and delivering responses whose claim is
    /// older than `threshold` to pending.
    pub fn recover_stale(&self, threshold: Duration) -> Result<StaleSweep> {
        self.recover_stale_at(threshold, Utc::now())
    }

    /// [`recover_stale`](Self::recover_stale) evaluated at an explicit
    /// point in time.
    pub fn recover_stale_at(&self, threshold: Duration, now: DateTime<Utc>) -> Result<StaleSweep> {
        let cutoff = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|t| now.checked_sub_signed(t))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut sweep = StaleSweep::default();

        {
            let mut state = self.lock()?;

            let stale_work: Vec<WorkId> = state
                .work
                .values()
                .filter(|i| i.status == WorkStatus::Processing && i.updated_at < cutoff)
                .map(|i| i.id.clone())
                .collect();
            for id in stale_work {
                if let Some(item) = state.work.get(&id) {
                    let mut updated = item.clone();
                    updated.release();
                    self.persist_work(&updated)?;
                    info!(work_id = %id, claimant = ?item.claimant, "recovered stale claim");
                    state.insert_work(updated);
                    sweep.work += 1;
                }
            }

            let stale_deliveries: Vec<ResponseId> = state
                .responses
                .values()
                .filter(|r| r.status == ResponseStatus::Delivering && r.updated_at < cutoff)
                .map(|r| r.id.clone())
                .collect();
            for id in stale_deliveries {
                if let Some(item) = state.responses.get(&id) {
                    let mut updated = item.clone();
                    updated.set_status(ResponseStatus::Pending);
                    self.persist_response(&updated)?;
                    info!(response_id = %id, "recovered stale delivery");
                    state.insert_response(updated);
                    sweep.deliveries += 1;
                }
            }
        }

        if sweep.work > 0 {
            self.wake.notify_one();
        }
        Ok(sweep)
    }

    pub fn get(&self, id: &WorkId) -> Option<WorkItem> {
        let state = self.state.lock().ok()?;
        state.work.get(id).cloned()
    }

    /// Lists work items, oldest first.
    pub fn list(&self, filter: Option<WorkFilter>) -> Vec<WorkItem> {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };

        let mut items: Vec<WorkItem> = state
            .work
            .values()
            .filter(|item| filter.as_ref().map_or(true, |f| f.matches(item)))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    /// Items that exhausted their retry budget.
    pub fn dead_letters(&self) -> Vec<WorkItem> {
        self.list(Some(WorkFilter::new().with_status(WorkStatus::Dead)))
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.pending_work.len()).unwrap_or(0)
    }

    pub fn counts(&self) -> QueueCounts {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return QueueCounts::default(),
        };

        let mut counts = QueueCounts::default();
        for item in state.work.values() {
            match item.status {
                WorkStatus::Pending => counts.pending += 1,
                WorkStatus::Processing => counts.processing += 1,
                WorkStatus::Completed => counts.completed += 1,
                WorkStatus::Dead => counts.dead += 1,
            }
        }
        for item in state.responses.values() {
            match item.status {
                ResponseStatus::Pending => counts.responses_pending += 1,
                ResponseStatus::Delivering => counts.responses_delivering += 1,
                ResponseStatus::Acked => counts.responses_acked += 1,
            }
        }
        counts
    }

    /// Deletes completed and dead work, and acked responses, last updated
    /// before `before`. Returns the number of records removed.
    pub fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock()?;

        let work: Vec<WorkId> = state
            .work
            .values()
            .filter(|i| i.status.is_terminal() && i.updated_at < before)
            .map(|i| i.id.clone())
            .collect();
        let responses: Vec<ResponseId> = state
            .responses
            .values()
            .filter(|r| r.status == ResponseStatus::Acked && r.updated_at < before)
            .map(|r| r.id.clone())
            .collect();

        for id in &work {
            if let Some(records) = &self.records {
                records.delete_work(id)?;
            }
            state.work.remove(id);
        }
        for id in &responses {
            if let Some(records) = &self.records {
                records.delete_response(id)?;
            }
            state.responses.remove(id);
        }

        let removed = work.len() + responses.len();
        if removed > 0 {
            info!(work = work.len(), responses = responses.len(), "pruned queue records");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Response side
    // ------------------------------------------------------------------

    /// Adds a response in the pending state.
    pub fn enqueue_response(&self, mut item: ResponseItem) -> Result<ResponseId> {
        item.status = ResponseStatus::Pending;
        let id = item.id.clone();

        let mut state = self.lock()?;
        self.persist_response(&item)?;
        debug!(response_id = %id, channel = %item.channel, "enqueued response");
        state.insert_response(item);
        Ok(id)
    }

    /// Pending responses for `channel`, oldest first. Nothing is claimed.
    pub fn poll_pending(&self, channel: &str) -> Vec<ResponseItem> {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };

        state
            .pending_responses
            .iter()
            .filter_map(|(_, id)| state.responses.get(id))
            .filter(|r| r.channel == channel)
            .cloned()
            .collect()
    }

    /// Claims a pending response for delivery.
    ///
    /// Returns `Ok(None)` if another consumer already claimed it or it was
    /// already acknowledged.
    pub fn claim_for_delivery(&self, id: &ResponseId) -> Result<Option<ResponseItem>> {
        let mut state = self.lock()?;
        let item = state
            .responses
            .get(id)
            .ok_or_else(|| QueueError::ResponseNotFound(id.to_string()))?;

        if item.status != ResponseStatus::Pending {
            trace!(response_id = %id, status = ?item.status, "delivery claim conflict");
            return Ok(None);
        }

        let mut claimed = item.clone();
        claimed.set_status(ResponseStatus::Delivering);
        self.persist_response(&claimed)?;
        state.pending_responses.remove(&(claimed.created_at, id.clone()));
        state.responses.insert(id.clone(), claimed.clone());
        Ok(Some(claimed))
    }

    /// Acknowledges a delivered response.
    pub fn ack(&self, id: &ResponseId) -> Result<()> {
        self.transition_response(id, ResponseStatus::Delivering, ResponseStatus::Acked)
    }

    /// Releases a delivery claim so the response can be delivered again.
    pub fn unclaim(&self, id: &ResponseId) -> Result<()> {
        self.transition_response(id, ResponseStatus::Delivering, ResponseStatus::Pending)
    }

    fn transition_response(
        &self,
        id: &ResponseId,
        from: ResponseStatus,
        to: ResponseStatus,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let item = state
            .responses
            .get(id)
            .ok_or_else(|| QueueError::ResponseNotFound(id.to_string()))?;

        if item.status != from {
            return Err(QueueError::InvalidState(format!(
                "cannot move response from {:?} to {:?}",
                item.status, to
            )));
        }

        let mut updated = item.clone();
        updated.set_status(to);
        self.persist_response(&updated)?;
        state.insert_response(updated);
        Ok(())
    }

    pub fn get_response(&self, id: &ResponseId) -> Option<ResponseItem> {
        let state = self.state.lock().ok()?;
        state.responses.get(id).cloned()
    }
}

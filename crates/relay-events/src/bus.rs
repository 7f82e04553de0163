//! EventBus - fire-and-forget event fan-out.
//!
//! Two sinks per emit:
//! - a bounded in-memory history (`Arc<RwLock<VecDeque>>`)
//! - a tokio `broadcast` channel for live subscribers
//!
//! The JSON-lines journal on disk is one such subscriber, written by a
//! background task ([`EventBus::spawn_journal`]), so emitting never does
//! file I/O.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use relay_persistence::atomic::append_json_line;
use relay_persistence::PersistenceError;

use crate::error::{EventError, Result};
use crate::event::{Envelope, LifecycleEvent};
use crate::filter::EventFilter;

/// Default number of events kept in memory.
pub const DEFAULT_HISTORY: usize = 512;

const CHANNEL_CAPACITY: usize = 1024;

/// The background task behind [`EventBus::spawn_journal`].
pub struct JournalHandle {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl JournalHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the task to write everything emitted before the last bus
    /// handle was dropped.
    pub async fn finish(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "event journal task failed");
        }
    }
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
    history: Arc<RwLock<VecDeque<Envelope>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Creates a bus that keeps the last `capacity` events in memory.
    pub fn with_history(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Appends every event emitted from now on to `path`, one JSON line
    /// each, from a background task. Must be called inside a tokio runtime.
    ///
    /// The task ends once every handle to the bus has been dropped and
    /// the remaining events are written.
    pub fn spawn_journal(&self, path: impl Into<PathBuf>) -> JournalHandle {
        let path = path.into();
        let mut rx = self.tx.subscribe();
        let target = path.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Err(e) = append_json_line(&target, &envelope) {
                            debug!(error = %e, "failed to append event journal");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, path = %target.display(), "event journal fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        JournalHandle { path, task }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Records and broadcasts an event. Never blocks on consumers and
    /// never fails.
    pub fn emit(&self, event: LifecycleEvent) {
        let envelope = Envelope::now(event);
        trace!(event = envelope.event.name(), "emit");

        if let Ok(mut history) = self.history.write() {
            if self.capacity > 0 {
                if history.len() == self.capacity {
                    history.pop_front();
                }
                history.push_back(envelope.clone());
            }
        }

        // No receivers is fine.
        let _ = self.tx.send(envelope);
    }

    /// Events still held in memory, oldest first.
    pub fn recent(&self, filter: Option<&EventFilter>) -> Vec<Envelope> {
        let history = match self.history.read() {
            Ok(h) => h,
            Err(_) => return Vec::new(),
        };
        history
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(&e.event)))
            .cloned()
            .collect()
    }

    /// Reads a journal written by a bus, skipping a torn final line.
    pub fn read_journal(path: &Path, filter: Option<&EventFilter>) -> Result<Vec<Envelope>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path).map_err(|source| PersistenceError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Envelope>(line) {
                Ok(envelope) => {
                    if filter.map_or(true, |f| f.matches(&envelope.event)) {
                        events.push(envelope);
                    }
                }
                Err(_) if idx + 1 == lines.len() && !text.ends_with('\n') => break,
                Err(source) => return Err(EventError::Malformed { line: idx + 1, source }),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_models::{ConversationId, JobId, WorkId};
    use tempfile::tempdir;

    fn routed(n: usize) -> LifecycleEvent {
        LifecycleEvent::ItemRouted {
            work_id: WorkId::from_string(format!("work-{}", n)),
            lane: "agent:coder".into(),
            agent: "coder".into(),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(routed(1));
        assert_eq!(bus.recent(None).len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::with_history(3);
        for n in 0..5 {
            bus.emit(routed(n));
        }
        let recent = bus.recent(None);
        assert_eq!(recent.len(), 3);
        assert_eq!(
            recent[0].event,
            routed(2),
            "oldest events are dropped first"
        );
    }

    #[test]
    fn test_recent_with_filter() {
        let bus = EventBus::new();
        let conv = ConversationId::from_string("conv-1");
        bus.emit(routed(1));
        bus.emit(LifecycleEvent::ConversationEnded {
            conversation_id: conv.clone(),
            responses: 2,
            timed_out: false,
        });

        let filter = EventFilter::new().with_conversation(conv);
        let matched = bus.recent(Some(&filter));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].event.name(), "conversation_ended");
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let clone = bus.clone();

        clone.emit(LifecycleEvent::JobDone {
            job_id: JobId::from_string("job-1"),
            swarm: "review".into(),
            succeeded: 3,
            failed: 0,
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.name(), "job_done");
        // Clones share history.
        assert_eq!(bus.recent(None).len(), 1);
    }

    #[tokio::test]
    async fn test_journal_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::new();
        let journal = bus.spawn_journal(&path);
        assert_eq!(journal.path(), path.as_path());

        bus.emit(routed(1));
        bus.emit(LifecycleEvent::JobFailed {
            job_id: JobId::from_string("job-9"),
            swarm: "scan".into(),
            error: "no input".into(),
        });
        drop(bus);
        journal.finish().await;

        let all = EventBus::read_journal(&path, None).unwrap();
        assert_eq!(all.len(), 2);

        let filter = EventFilter::new().with_job("job-9".into());
        let failed = EventBus::read_journal(&path, Some(&filter)).unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].event.is_failure());
    }

    #[tokio::test]
    async fn test_journal_written_off_the_emit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::new();
        let journal = bus.spawn_journal(&path);

        // Current-thread runtime: the writer cannot run until this test yields.
        bus.emit(routed(1));
        assert!(!path.exists());

        drop(bus);
        journal.finish().await;
        assert_eq!(EventBus::read_journal(&path, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_journal_tolerates_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::new();
        let journal = bus.spawn_journal(&path);
        bus.emit(routed(1));
        drop(bus);
        journal.finish().await;

        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("{\"at\":\"2025");
        fs::write(&path, text).unwrap();

        assert_eq!(EventBus::read_journal(&path, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_journal_does_not_fail_emit() {
        let dir = tempdir().unwrap();
        // A directory where the journal file should be.
        let path = dir.path().join("journal");
        fs::create_dir_all(&path).unwrap();

        let bus = EventBus::new();
        let journal = bus.spawn_journal(&path);
        bus.emit(routed(1));
        assert_eq!(bus.recent(None).len(), 1);
        drop(bus);
        journal.finish().await;
    }
}

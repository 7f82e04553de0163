//! ConversationTracker - fan-out/fan-in bookkeeping for team conversations.
//!
//! # Concurrency
//!
//! The tracker keeps a map of conversations, each behind its own mutex.
//! Replies for different conversations never contend; replies for the
//! same conversation are serialized, so opening branches, closing the
//! current branch, and the final zero check happen as one step.
//!
//! Lock order is always conversation, then map. The map lock is never
//! held while waiting for a conversation lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::{ConversationSettings, Roster};
use relay_events::{EventBus, LifecycleEvent};
use relay_models::{ConversationId, ResponseId, ResponseItem, WorkItem};
use relay_queue::QueueStore;
use tracing::{debug, error, info, warn};

use crate::conversation::{Conversation, ConversationState};
use crate::error::{ConversationError, Result};
use crate::mention::scan_mentions;
use crate::outbound::{collect_file_tags, ResponseShaper};

/// Default cap on agent messages per conversation.
pub const DEFAULT_MAX_MESSAGES: u32 = 15;

/// Default age after which a conversation is closed with what it has.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationConfig {
    pub max_messages: u32,
    pub timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConversationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&ConversationSettings> for ConversationConfig {
    fn from(settings: &ConversationSettings) -> Self {
        Self {
            max_messages: settings.max_messages,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// What happened to a conversation after one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Other branches are still open.
    Continuing { derived: usize, pending: u32 },
    /// This was the last branch; the combined reply was enqueued.
    Completed { response_id: ResponseId },
    /// The conversation is no longer tracked (it timed out or never existed).
    Orphaned,
}

type Shared = Arc<Mutex<Conversation>>;

pub struct ConversationTracker {
    conversations: Mutex<HashMap<ConversationId, Shared>>,
    queue: Arc<QueueStore>,
    events: EventBus,
    roster: Arc<Roster>,
    shaper: ResponseShaper,
    config: ConversationConfig,
}

fn lock_conv(conv: &Shared) -> Result<MutexGuard<'_, Conversation>> {
    conv.lock()
        .map_err(|e| ConversationError::LockPoisoned(e.to_string()))
}

impl ConversationTracker {
    pub fn new(
        queue: Arc<QueueStore>,
        events: EventBus,
        roster: Arc<Roster>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            queue,
            events,
            roster,
            shaper: ResponseShaper::default(),
            config,
        }
    }

    /// Shapes the combined reply (file tags, long output) with `shaper`.
    pub fn with_shaper(mut self, shaper: ResponseShaper) -> Self {
        self.shaper = shaper;
        self
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    fn map(&self) -> Result<MutexGuard<'_, HashMap<ConversationId, Shared>>> {
        self.conversations
            .lock()
            .map_err(|e| ConversationError::LockPoisoned(e.to_string()))
    }

    fn lookup(&self, id: &ConversationId) -> Result<Option<Shared>> {
        Ok(self.map()?.get(id).cloned())
    }

    /// Starts tracking a conversation for `origin`, routed to `team`.
    ///
    /// The new conversation has one open branch: the turn about to run
    /// for the team leader.
    pub fn start(&self, origin: &WorkItem, team: &str) -> Result<ConversationId> {
        let team = self
            .roster
            .team(team)
            .ok_or_else(|| ConversationError::UnknownTeam(team.to_string()))?;
        let conv = Conversation::new(origin.clone(), team.id, self.config.max_messages);
        let id = conv.id.clone();

        self.map()?.insert(id.clone(), Arc::new(Mutex::new(conv)));
        info!(conversation_id = %id, team = team.id, work_id = %origin.id, "conversation started");
        self.events.emit(LifecycleEvent::ConversationStarted {
            conversation_id: id.clone(),
            team: team.id.to_string(),
            work_id: origin.id.clone(),
        });
        Ok(id)
    }

    /// Records `agent`'s reply to one branch of the conversation.
    ///
    /// Valid mentions in the reply are enqueued as new branches before the
    /// current branch is closed. When no branch remains open the combined
    /// reply is enqueued for the origin's channel and the conversation is
    /// forgotten.
    pub fn on_reply(
        &self,
        id: &ConversationId,
        agent: &str,
        reply: &str,
    ) -> Result<TurnOutcome> {
        let Some(shared) = self.lookup(id)? else {
            debug!(conversation_id = %id, agent, "reply for untracked conversation");
            return Ok(TurnOutcome::Orphaned);
        };
        let mut conv = lock_conv(&shared)?;
        if conv.state == ConversationState::Complete {
            return Ok(TurnOutcome::Orphaned);
        }
        if conv.pending == 0 {
            // Every branch already replied; only the combined reply is
            // still undelivered.
            let response_id = self.finish(&mut conv, false)?;
            self.map()?.remove(id);
            return Ok(TurnOutcome::Completed { response_id });
        }

        let (text, files) = collect_file_tags(reply);
        conv.record_reply(agent, text.clone(), files);

        let mut derived = 0;
        if let Some(team) = self.roster.team(&conv.team) {
            let scan = scan_mentions(&text, agent, &team, &self.roster);
            if !scan.mentions.is_empty() && !conv.can_fan_out() {
                warn!(
                    conversation_id = %id,
                    agent,
                    total = conv.total_messages,
                    "message cap reached, not forwarding mentions"
                );
            } else if !scan.mentions.is_empty() {
                conv.open_branches(agent, scan.mentions.len() as u32);
                for mention in scan.mentions {
                    let body = format!("[Message from teammate @{}]:\n{}", agent, mention.message);
                    let item = WorkItem::mention(&conv.origin, conv.id.clone(), agent, &mention.target, body);
                    match self.queue.enqueue(item) {
                        Ok(work_id) => {
                            derived += 1;
                            debug!(conversation_id = %id, work_id = %work_id, from = agent, to = %mention.target, "handoff");
                            self.events.emit(LifecycleEvent::ConversationHandoff {
                                conversation_id: id.clone(),
                                from: agent.to_string(),
                                to: mention.target.clone(),
                            });
                        }
                        Err(e) => {
                            // The branch never existed; take it back out of the count.
                            conv.pending = conv.pending.saturating_sub(1);
                            error!(conversation_id = %id, to = %mention.target, error = %e, "failed to enqueue handoff");
                        }
                    }
                }
            }
        }

        if conv.close_branch()? {
            let response_id = self.finish(&mut conv, false)?;
            self.map()?.remove(id);
            return Ok(TurnOutcome::Completed { response_id });
        }

        debug!(conversation_id = %id, pending = conv.pending, derived, "conversation continues");
        Ok(TurnOutcome::Continuing {
            derived,
            pending: conv.pending,
        })
    }

    /// Enqueues the combined reply. The conversation is only marked
    /// complete once the reply is queued; on error it stays active.
    fn finish(&self, conv: &mut Conversation, timed_out: bool) -> Result<ResponseId> {
        let mut body = conv.aggregate();
        if body.trim().is_empty() {
            body = "The team did not produce a reply in time.".to_string();
        }
        let (shaped, extra_files) = self.shaper.shape_or_inline(conv.id.as_str(), &body);
        let mut files = conv.files();
        files.extend(extra_files.into_iter().filter(|f| !conv.files().contains(f)));

        let response = ResponseItem::reply_to(&conv.origin, shaped)
            .with_agent(conv.team.clone())
            .with_files(files);
        let response_id = self.queue.enqueue_response(response)?;
        conv.state = ConversationState::Complete;

        info!(
            conversation_id = %conv.id,
            replies = conv.replies.len(),
            timed_out,
            "conversation complete"
        );
        self.events.emit(LifecycleEvent::ConversationEnded {
            conversation_id: conv.id.clone(),
            responses: conv.replies.len(),
            timed_out,
        });
        Ok(response_id)
    }

    /// Open branches other than the one currently running, for prompts
    /// that tell an agent teammates are still working.
    pub fn pending_others(&self, id: &ConversationId) -> Option<u32> {
        let shared = self.lookup(id).ok()??;
        let conv = shared.lock().ok()?;
        Some(conv.pending.saturating_sub(1))
    }

    /// Closes conversations older than the configured timeout.
    pub fn expire(&self) -> Result<Vec<ResponseId>> {
        self.expire_at(Utc::now())
    }

    pub fn expire_at(&self, now: DateTime<Utc>) -> Result<Vec<ResponseId>> {
        let all: Vec<(ConversationId, Shared)> = self
            .map()?
            .iter()
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect();

        let mut closed = Vec::new();
        for (id, shared) in all {
            let mut conv = lock_conv(&shared)?;
            if conv.state != ConversationState::Active || !conv.is_expired(now, self.config.timeout) {
                continue;
            }
            warn!(conversation_id = %id, pending = conv.pending, "conversation timed out");
            closed.push(self.finish(&mut conv, true)?);
            self.map()?.remove(&id);
        }
        Ok(closed)
    }

    pub fn active_count(&self) -> usize {
        self.conversations.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Snapshot of a tracked conversation.
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        let shared = self.lookup(id).ok()??;
        let conv = shared.lock().ok()?;
        Some(conv.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Settings;
    use relay_models::{WorkKind, WorkStatus};
    use relay_persistence::{ArtifactStore, RecordStore};
    use relay_queue::{QueueConfig, WorkFilter};
    use std::thread;
    use tempfile::tempdir;

    fn make_roster() -> Arc<Roster> {
        let json = r#"{
            "agents": { "lead": {}, "coder": {}, "reviewer": {} },
            "teams": { "dev": { "agents": ["lead", "coder", "reviewer"], "leader": "lead" } }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        Arc::new(Roster::from_settings(&settings))
    }

    fn make_tracker(config: ConversationConfig) -> (ConversationTracker, Arc<QueueStore>, EventBus) {
        let queue = Arc::new(QueueStore::in_memory(QueueConfig::default()));
        let events = EventBus::new();
        let tracker = ConversationTracker::new(Arc::clone(&queue), events.clone(), make_roster(), config);
        (tracker, queue, events)
    }

    fn origin() -> WorkItem {
        WorkItem::new("discord", "alice", "@dev build the feature")
    }

    fn derived_items(queue: &QueueStore, id: &ConversationId) -> Vec<WorkItem> {
        queue.list(Some(WorkFilter::new().with_conversation(id.clone())))
    }

    #[test]
    fn test_single_reply_completes_unchanged() {
        let (tracker, queue, _) = make_tracker(ConversationConfig::default());
        let id = tracker.start(&origin(), "dev").unwrap();

        let outcome = tracker.on_reply(&id, "lead", "Done, no help needed.").unwrap();
        let TurnOutcome::Completed { response_id } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        let response = queue.get_response(&response_id).unwrap();
        assert_eq!(response.body, "Done, no help needed.");
        assert_eq!(response.channel, "discord");
        assert_eq!(response.destination, "alice");
        assert_eq!(response.agent.as_deref(), Some("dev"));
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_two_mentions_fan_out_before_decrement() {
        let (tracker, queue, events) = make_tracker(ConversationConfig::default());
        let id = tracker.start(&origin(), "dev").unwrap();

        let outcome = tracker
            .on_reply(&id, "lead", "Plan ready. [@coder: write it] [@reviewer: review it]")
            .unwrap();
        // 1 (leader) + 2 derived - 1 (leader finished)
        assert_eq!(outcome, TurnOutcome::Continuing { derived: 2, pending: 2 });

        let items = derived_items(&queue, &id);
        assert_eq!(items.len(), 2);
        let targets: Vec<_> = items.iter().map(|i| i.target.clone().unwrap()).collect();
        assert!(targets.contains(&"coder".to_string()));
        assert!(targets.contains(&"reviewer".to_string()));
        for item in &items {
            assert_eq!(item.status, WorkStatus::Pending);
            assert_eq!(item.channel, "discord");
            assert!(matches!(item.kind, WorkKind::Mention { ref origin_agent, .. } if origin_agent == "lead"));
            assert!(item.body.starts_with("[Message from teammate @lead]:\nPlan ready."));
        }

        let handoffs = events
            .recent(None)
            .into_iter()
            .filter(|e| e.event.name() == "conversation_handoff")
            .count();
        assert_eq!(handoffs, 2);
    }

    #[test]
    fn test_fan_in_aggregates_once() {
        let (tracker, queue, events) = make_tracker(ConversationConfig::default());
        let id = tracker.start(&origin(), "dev").unwrap();
        tracker
            .on_reply(&id, "lead", "[@coder: write it] [@reviewer: review it]")
            .unwrap();
        assert_eq!(tracker.pending_others(&id), Some(1));

        let first = tracker.on_reply(&id, "coder", "Written.").unwrap();
        assert_eq!(first, TurnOutcome::Continuing { derived: 0, pending: 1 });

        let last = tracker.on_reply(&id, "reviewer", "Approved.").unwrap();
        let TurnOutcome::Completed { response_id } = last else {
            panic!("expected completion");
        };

        let body = queue.get_response(&response_id).unwrap().body;
        assert!(body.contains("@coder: Written."));
        assert!(body.contains("@reviewer: Approved."));
        assert!(body.contains("\n\n------\n\n"));

        // A straggler after completion does nothing.
        assert_eq!(tracker.on_reply(&id, "coder", "late").unwrap(), TurnOutcome::Orphaned);
        let ended = events
            .recent(None)
            .into_iter()
            .filter(|e| e.event.name() == "conversation_ended")
            .count();
        assert_eq!(ended, 1);
        assert_eq!(queue.counts().responses_pending, 1);
    }

    #[test]
    fn test_invalid_mention_produces_nothing() {
        let (tracker, queue, _) = make_tracker(ConversationConfig::default());
        let id = tracker.start(&origin(), "dev").unwrap();

        let outcome = tracker.on_reply(&id, "lead", "[@nope: x]").unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert!(derived_items(&queue, &id).is_empty());
    }

    #[test]
    fn test_message_cap_stops_fan_out() {
        let (tracker, queue, _) = make_tracker(ConversationConfig::new().with_max_messages(2));
        let id = tracker.start(&origin(), "dev").unwrap();

        tracker.on_reply(&id, "lead", "[@coder: go]").unwrap();
        // Second message hits the cap: its mention is not forwarded.
        let outcome = tracker.on_reply(&id, "coder", "[@reviewer: check]").unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(derived_items(&queue, &id).len(), 1);
    }

    #[test]
    fn test_ping_pong_terminates_at_cap() {
        let (tracker, _queue, _) = make_tracker(ConversationConfig::new().with_max_messages(5));
        let id = tracker.start(&origin(), "dev").unwrap();

        let mut speaker = "lead";
        let mut other = "coder";
        let mut outcome = TurnOutcome::Orphaned;
        for _ in 0..10 {
            outcome = tracker
                .on_reply(&id, speaker, &format!("[@{}: your turn]", other))
                .unwrap();
            if matches!(outcome, TurnOutcome::Completed { .. }) {
                break;
            }
            std::mem::swap(&mut speaker, &mut other);
        }
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert!(tracker.get(&id).is_none());
    }

    #[test]
    fn test_concurrent_branches_complete_exactly_once() {
        let (tracker, queue, _) = make_tracker(ConversationConfig::new().with_max_messages(50));
        let tracker = Arc::new(tracker);
        let id = tracker.start(&origin(), "dev").unwrap();

        // Leader fans out to both teammates several times over.
        let tags: String = (0..8)
            .map(|n| format!("[@coder: part {n}] [@reviewer: part {n}] "))
            .collect();
        let outcome = tracker.on_reply(&id, "lead", &tags).unwrap();
        assert_eq!(outcome, TurnOutcome::Continuing { derived: 16, pending: 16 });

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let tracker = Arc::clone(&tracker);
                let id = id.clone();
                thread::spawn(move || {
                    let agent = if n % 2 == 0 { "coder" } else { "reviewer" };
                    tracker.on_reply(&id, agent, &format!("reply {n}")).unwrap()
                })
            })
            .collect();
        let completions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, TurnOutcome::Completed { .. }))
            .count();

        assert_eq!(completions, 1);
        assert_eq!(queue.counts().responses_pending, 1);
    }

    #[test]
    fn test_expire_closes_with_partial_replies() {
        let (tracker, queue, _) = make_tracker(ConversationConfig::default());
        let id = tracker.start(&origin(), "dev").unwrap();
        tracker.on_reply(&id, "lead", "Working on it [@coder: help]").unwrap();

        assert!(tracker.expire().unwrap().is_empty());

        let closed = tracker
            .expire_at(Utc::now() + chrono::Duration::minutes(31))
            .unwrap();
        assert_eq!(closed.len(), 1);
        let response = queue.get_response(&closed[0]).unwrap();
        assert!(response.body.starts_with("Working on it"));
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.on_reply(&id, "coder", "too late").unwrap(), TurnOutcome::Orphaned);
    }

    #[test]
    fn test_files_collected_from_replies() {
        let (tracker, queue, _) = make_tracker(ConversationConfig::default());
        let id = tracker.start(&origin(), "dev").unwrap();

        let TurnOutcome::Completed { response_id } = tracker
            .on_reply(&id, "lead", "Chart attached [send_file: /tmp/chart.png]")
            .unwrap()
        else {
            panic!("expected completion");
        };
        let response = queue.get_response(&response_id).unwrap();
        assert_eq!(response.body, "Chart attached");
        assert_eq!(response.files, vec!["/tmp/chart.png".to_string()]);
    }

    #[test]
    fn test_unsaved_long_reply_sent_inline() {
        let queue = Arc::new(QueueStore::in_memory(QueueConfig::default()));
        let shaper = ResponseShaper::new(ArtifactStore::new("/dev/null/not-a-dir"), 10, 5);
        let tracker = ConversationTracker::new(
            Arc::clone(&queue),
            EventBus::new(),
            make_roster(),
            ConversationConfig::default(),
        )
        .with_shaper(shaper);
        let id = tracker.start(&origin(), "dev").unwrap();

        let reply = "a long answer from the leader";
        let TurnOutcome::Completed { response_id } = tracker.on_reply(&id, "lead", reply).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(queue.get_response(&response_id).unwrap().body, reply);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_failed_delivery_stays_active_until_retried() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(QueueStore::open(RecordStore::new(dir.path()), QueueConfig::default()).unwrap());
        // A file where the responses directory belongs makes every response write fail.
        let blocker = dir.path().join("responses");
        std::fs::write(&blocker, "").unwrap();
        let tracker = ConversationTracker::new(
            Arc::clone(&queue),
            EventBus::new(),
            make_roster(),
            ConversationConfig::default(),
        );
        let id = tracker.start(&origin(), "dev").unwrap();

        assert!(tracker.on_reply(&id, "lead", "All done.").is_err());
        let conv = tracker.get(&id).unwrap();
        assert_eq!(conv.state, ConversationState::Active);
        assert_eq!(conv.pending, 0);

        // The retried turn delivers the combined reply without recording the reply twice.
        std::fs::remove_file(&blocker).unwrap();
        let TurnOutcome::Completed { response_id } = tracker.on_reply(&id, "lead", "All done.").unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(queue.get_response(&response_id).unwrap().body, "All done.");
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_failed_delivery_closed_by_expiry() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(QueueStore::open(RecordStore::new(dir.path()), QueueConfig::default()).unwrap());
        let blocker = dir.path().join("responses");
        std::fs::write(&blocker, "").unwrap();
        let tracker = ConversationTracker::new(
            Arc::clone(&queue),
            EventBus::new(),
            make_roster(),
            ConversationConfig::default(),
        );
        let id = tracker.start(&origin(), "dev").unwrap();
        assert!(tracker.on_reply(&id, "lead", "Partial work").is_err());

        std::fs::remove_file(&blocker).unwrap();
        let closed = tracker
            .expire_at(Utc::now() + chrono::Duration::days(1))
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(queue.get_response(&closed[0]).unwrap().body, "Partial work");
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_start_unknown_team() {
        let (tracker, _, _) = make_tracker(ConversationConfig::default());
        assert!(matches!(
            tracker.start(&origin(), "ghosts"),
            Err(ConversationError::UnknownTeam(_))
        ));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ConversationSettings {
            max_messages: 4,
            timeout_secs: 60,
        };
        let config = ConversationConfig::from(&settings);
        assert_eq!(config.max_messages, 4);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }
}

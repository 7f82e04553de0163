//! SwarmEngine - runs one swarm job from trigger to final response.

use std::sync::Arc;

use relay_agent::SharedExecutor;
use relay_conversation::ResponseShaper;
use relay_core::{Roster, SwarmSettings};
use relay_events::{EventBus, LifecycleEvent};
use relay_models::{JobId, ResponseId, ResponseItem, WorkItem};
use relay_persistence::ArtifactStore;
use relay_queue::QueueStore;
use tracing::{error, info, warn};

use crate::config::SwarmLimits;
use crate::error::{Result, SwarmError};
use crate::input::resolve_input;
use crate::job::{Batch, JobState, SwarmJob};
use crate::output::{progress_message, render_failure, render_report};
use crate::pool::{PoolObserver, Quiet, RetryPolicy, TaskOutcome, WorkerPool};
use crate::reduce::reduce;
use crate::shuffle::run_shuffle;
use crate::split::split_batches;
use crate::template::{fill, has_placeholder};

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub swarm: String,
    pub state: JobState,
    pub succeeded: usize,
    pub failed: usize,
    /// The final (or failure) response sent to the trigger's channel.
    pub response_id: ResponseId,
}

pub struct SwarmEngine {
    executor: SharedExecutor,
    queue: Arc<QueueStore>,
    events: EventBus,
    roster: Arc<Roster>,
    limits: SwarmLimits,
    shaper: ResponseShaper,
}

/// Batch events and progress updates for the map stage.
struct MapObserver<'a> {
    engine: &'a SwarmEngine,
    job_id: &'a JobId,
    swarm: &'a str,
    trigger: &'a WorkItem,
    progress_every: usize,
}

impl PoolObserver for MapObserver<'_> {
    fn started(&self, index: usize) {
        self.engine.events.emit(LifecycleEvent::SwarmBatchStarted {
            job_id: self.job_id.clone(),
            batch: index,
        });
    }

    fn finished(&self, outcome: &TaskOutcome, completed: usize, total: usize) {
        self.engine.events.emit(LifecycleEvent::SwarmBatchDone {
            job_id: self.job_id.clone(),
            batch: outcome.index,
            attempts: outcome.attempts,
            ok: outcome.is_ok(),
        });

        if self.progress_every == 0 || completed % self.progress_every != 0 || completed == total {
            return;
        }
        let update = ResponseItem::reply_to(self.trigger, progress_message(self.swarm, completed, total))
            .with_agent(self.swarm);
        if let Err(e) = self.engine.queue.enqueue_response(update) {
            warn!(job_id = %self.job_id, error = %e, "failed to enqueue progress update");
        }
    }
}

fn map_prompt(settings: &SwarmSettings, batch: &Batch, batches: usize, trigger: &str) -> String {
    let items = batch.items.join("\n");
    let number = (batch.index + 1).to_string();
    let batches = batches.to_string();
    let prompt = fill(
        &settings.prompt,
        &[
            ("items", &items),
            ("batch", &number),
            ("batches", &batches),
            ("trigger", trigger),
        ],
    );
    if has_placeholder(&settings.prompt, "items") {
        prompt
    } else {
        format!("{}\n\n{}", prompt, items)
    }
}

impl SwarmEngine {
    pub fn new(
        executor: SharedExecutor,
        queue: Arc<QueueStore>,
        events: EventBus,
        roster: Arc<Roster>,
        limits: SwarmLimits,
    ) -> Self {
        Self {
            executor,
            queue,
            events,
            roster,
            limits,
            shaper: ResponseShaper::default(),
        }
    }

    /// Saves long final outputs under `artifacts`.
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.shaper = ResponseShaper::new(
            artifacts,
            self.limits.max_inline_chars,
            self.limits.preview_chars,
        );
        self
    }

    /// Runs swarm `swarm` for `trigger`. `text` is the trigger message with
    /// the swarm mention removed.
    ///
    /// Input resolution failures end the job as failed and are reported to
    /// the trigger's channel; they are not returned as errors.
    pub async fn run(&self, swarm: &str, trigger: &WorkItem, text: &str) -> Result<JobReport> {
        let (swarm_id, settings) = self
            .roster
            .swarm(swarm)
            .ok_or_else(|| SwarmError::UnknownSwarm(swarm.to_string()))?;
        let name = settings.name.as_deref().unwrap_or(swarm_id);
        let concurrency = self.limits.concurrency(settings.concurrency);
        let mut job = SwarmJob::new(swarm_id, settings.batch_size, concurrency);
        info!(job_id = %job.id, swarm = swarm_id, work_id = %trigger.id, "swarm job started");

        match self.execute(&mut job, settings, trigger, text, name).await {
            Ok(result) => {
                let body = render_report(name, &job, &result);
                let (body, files) = self.shaper.shape_or_inline(job.id.as_str(), &body);
                let response = ResponseItem::reply_to(trigger, body)
                    .with_agent(swarm_id)
                    .with_files(files);
                let response_id = self.queue.enqueue_response(response)?;

                info!(
                    job_id = %job.id,
                    succeeded = job.succeeded(),
                    failed = job.failed(),
                    "swarm job done"
                );
                self.events.emit(LifecycleEvent::JobDone {
                    job_id: job.id.clone(),
                    swarm: swarm_id.to_string(),
                    succeeded: job.succeeded(),
                    failed: job.failed(),
                });
                Ok(self.report(&job, response_id))
            }
            Err(e) => {
                job.fail(e.to_string());
                error!(job_id = %job.id, swarm = swarm_id, error = %e, "swarm job failed");
                self.events.emit(LifecycleEvent::JobFailed {
                    job_id: job.id.clone(),
                    swarm: swarm_id.to_string(),
                    error: e.to_string(),
                });
                if !e.is_input_error() {
                    return Err(e);
                }
                let notice = ResponseItem::reply_to(trigger, render_failure(name, &e.to_string()))
                    .with_agent(swarm_id);
                let response_id = self.queue.enqueue_response(notice)?;
                Ok(self.report(&job, response_id))
            }
        }
    }

    fn report(&self, job: &SwarmJob, response_id: ResponseId) -> JobReport {
        JobReport {
            job_id: job.id.clone(),
            swarm: job.swarm.clone(),
            state: job.state,
            succeeded: job.succeeded(),
            failed: job.failed(),
            response_id,
        }
    }

    async fn execute(
        &self,
        job: &mut SwarmJob,
        settings: &SwarmSettings,
        trigger: &WorkItem,
        text: &str,
        name: &str,
    ) -> Result<String> {
        let input = resolve_input(text, &trigger.files, &settings.input).await?;
        let mut items = input.items;
        if items.len() > self.limits.max_items {
            warn!(job_id = %job.id, count = items.len(), max = self.limits.max_items, "too many items, truncating");
            job.skipped_items = items.len() - self.limits.max_items;
            items.truncate(self.limits.max_items);
        }
        job.items = items;
        job.advance(JobState::InputResolved)?;

        job.advance(JobState::Splitting)?;
        job.batches = split_batches(&job.items, job.batch_size);
        job.advance(JobState::Mapping)?;

        let agent = settings.agent.as_deref().unwrap_or(&job.swarm);
        let pool = WorkerPool::new(
            Arc::clone(&self.executor),
            agent,
            job.concurrency,
            RetryPolicy::from(settings),
        );
        info!(
            job_id = %job.id,
            items = job.items.len(),
            batches = job.batches.len(),
            concurrency = job.concurrency,
            "mapping"
        );

        let total = job.batches.len();
        let prompts = job
            .batches
            .iter()
            .map(|b| map_prompt(settings, b, total, text))
            .collect();
        let observer = MapObserver {
            engine: self,
            job_id: &job.id,
            swarm: name,
            trigger,
            progress_every: settings.progress_every,
        };
        let outcomes = pool.run(prompts, &observer).await;
        for outcome in outcomes {
            let batch = &mut job.batches[outcome.index];
            match outcome.output {
                Ok(result) => batch.succeed(result, outcome.attempts),
                Err(error) => batch.fail(error, outcome.attempts),
            }
        }
        info!(job_id = %job.id, succeeded = job.succeeded(), failed = job.failed(), "map stage done");

        let result = match &settings.shuffle {
            Some(shuffle) => {
                job.advance(JobState::Shuffling)?;
                let outcome = {
                    let outputs: Vec<(usize, &str)> = job
                        .batches
                        .iter()
                        .filter_map(|b| b.result.as_deref().map(|r| (b.index, r)))
                        .collect();
                    run_shuffle(&pool, shuffle, &outputs, &Quiet).await
                };
                self.events.emit(LifecycleEvent::ShuffleDone {
                    job_id: job.id.clone(),
                    partitions: outcome.partitions,
                    skipped_records: outcome.skipped_records,
                });
                job.advance(JobState::Reducing)?;
                self.events.emit(LifecycleEvent::ReduceDone {
                    job_id: job.id.clone(),
                    strategy: "merge".into(),
                });
                outcome.text
            }
            None => {
                job.advance(JobState::Reducing)?;
                let outcome = reduce(&pool, &settings.reduce, &job.batches).await;
                self.events.emit(LifecycleEvent::ReduceDone {
                    job_id: job.id.clone(),
                    strategy: outcome.strategy.as_str().to_string(),
                });
                outcome.text
            }
        };

        job.advance(JobState::Done)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failure, ScriptedExecutor};
    use relay_core::Settings;
    use relay_events::EventFilter;
    use relay_queue::QueueConfig;
    use serde_json::json;
    use tempfile::tempdir;

    struct Harness {
        engine: SwarmEngine,
        executor: Arc<ScriptedExecutor>,
        queue: Arc<QueueStore>,
        events: EventBus,
    }

    fn harness(swarms: serde_json::Value, executor: ScriptedExecutor) -> Harness {
        let settings: Settings = serde_json::from_value(json!({ "swarms": swarms })).unwrap();
        let executor = Arc::new(executor);
        let queue = Arc::new(QueueStore::in_memory(QueueConfig::default()));
        let events = EventBus::new();
        let engine = SwarmEngine::new(
            executor.clone(),
            Arc::clone(&queue),
            events.clone(),
            Arc::new(Roster::from_settings(&settings)),
            SwarmLimits::default(),
        );
        Harness {
            engine,
            executor,
            queue,
            events,
        }
    }

    fn trigger(text: &str) -> WorkItem {
        WorkItem::new("discord", "alice", format!("@triage {text}"))
    }

    fn responses(queue: &QueueStore) -> Vec<String> {
        queue.poll_pending("discord").into_iter().map(|r| r.body).collect()
    }

    fn event_names(events: &EventBus, job_id: &JobId) -> Vec<&'static str> {
        events
            .recent(Some(&EventFilter::new().with_job(job_id.clone())))
            .into_iter()
            .map(|e| e.event.name())
            .collect()
    }

    #[tokio::test]
    async fn test_lines_map_and_concatenate() {
        let h = harness(
            json!({ "triage": { "prompt": "Batch {{batch}}/{{batches}}:\n{{items}}", "batch_size": 2 } }),
            ScriptedExecutor::new(|prompt, _| Ok(format!("handled {}", prompt.lines().count() - 1))),
        );
        let text = "one\ntwo\nthree\nfour\nfive";

        let report = h.engine.run("Triage", &trigger(text), text).await.unwrap();

        assert_eq!(report.state, JobState::Done);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);

        let calls = h.executor.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, agent, reset)| agent == "triage" && *reset));
        assert!(calls.iter().any(|(p, _, _)| p == "Batch 3/3:\nfive"));

        let bodies = responses(&h.queue);
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].starts_with("Swarm triage finished: 3/3 batches succeeded (5 items)"));
        assert!(bodies[0].contains("## Batch 1/3\nhandled 2"));
        assert!(bodies[0].contains("## Batch 3/3\nhandled 1"));

        let names = event_names(&h.events, &report.job_id);
        assert_eq!(names.iter().filter(|n| **n == "swarm_batch_started").count(), 3);
        assert_eq!(names.iter().filter(|n| **n == "swarm_batch_done").count(), 3);
        assert!(names.contains(&"reduce_done"));
        assert_eq!(names.last(), Some(&"job_done"));
    }

    #[tokio::test]
    async fn test_prompt_without_items_placeholder_gets_items_appended() {
        let h = harness(
            json!({ "triage": { "prompt": "Classify these.", "batch_size": 10 } }),
            ScriptedExecutor::echo(),
        );
        h.engine.run("triage", &trigger("a\nb"), "a\nb").await.unwrap();
        assert_eq!(h.executor.calls()[0].0, "Classify these.\n\na\nb");
    }

    #[tokio::test]
    async fn test_progress_updates() {
        let h = harness(
            json!({ "triage": { "prompt": "{{items}}", "batch_size": 1, "progress_every": 2, "concurrency": 1 } }),
            ScriptedExecutor::echo(),
        );
        let text = "1\n2\n3\n4\n5";
        h.engine.run("triage", &trigger(text), text).await.unwrap();

        let bodies = responses(&h.queue);
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0], "Swarm triage: 2/5 batches processed");
        assert_eq!(bodies[1], "Swarm triage: 4/5 batches processed");
        assert!(bodies[2].starts_with("Swarm triage finished"));
    }

    #[tokio::test]
    async fn test_failed_batch_reported_not_fatal() {
        let h = harness(
            json!({ "triage": { "prompt": "{{items}}", "batch_size": 1, "retry_delay_ms": 0 } }),
            ScriptedExecutor::new(|prompt, _| {
                if prompt == "bad" {
                    Err(failure("triage"))
                } else {
                    Ok("fine".into())
                }
            }),
        );
        let text = "good\nbad\nalso good";

        let report = h.engine.run("triage", &trigger(text), text).await.unwrap();

        assert_eq!(report.state, JobState::Done);
        assert_eq!((report.succeeded, report.failed), (2, 1));
        // 1 + 1 + 3 attempts
        assert_eq!(h.executor.calls().len(), 5);
        let body = &responses(&h.queue)[0];
        assert!(body.starts_with("Swarm triage finished: 2/3 batches succeeded, 1 failed"));
        assert!(body.contains("(failed after 3 attempts)"));
    }

    #[tokio::test]
    async fn test_input_failure_fails_job() {
        let h = harness(
            json!({ "triage": { "prompt": "{{items}}", "input": { "command": "gh issue list -R {{repo}}" } } }),
            ScriptedExecutor::echo(),
        );

        let report = h.engine.run("triage", &trigger("no repo"), "no repo").await.unwrap();

        assert_eq!(report.state, JobState::Failed);
        assert!(h.executor.calls().is_empty());
        let body = &responses(&h.queue)[0];
        assert!(body.starts_with("Swarm triage failed: no value for parameter {{repo}}"));
        assert_eq!(event_names(&h.events, &report.job_id), vec!["job_failed"]);
    }

    #[tokio::test]
    async fn test_unknown_swarm() {
        let h = harness(json!({}), ScriptedExecutor::echo());
        let err = h.engine.run("ghost", &trigger("x"), "x").await.unwrap_err();
        assert!(matches!(err, SwarmError::UnknownSwarm(_)));
    }

    #[tokio::test]
    async fn test_shuffle_pipeline() {
        let h = harness(
            json!({ "triage": {
                "prompt": "Tag these:\n{{items}}",
                "batch_size": 2,
                "shuffle": { "key_field": "area" }
            } }),
            ScriptedExecutor::new(|prompt, _| {
                if let Some(items) = prompt.strip_prefix("Tag these:\n") {
                    let records: Vec<serde_json::Value> = items
                        .lines()
                        .map(|id| {
                            let area = if id == "pr-1" { json!(["auth", "db"]) } else { json!("auth") };
                            json!({ "id": id, "area": area })
                        })
                        .collect();
                    Ok(serde_json::Value::Array(records).to_string())
                } else if prompt.starts_with("Merge") {
                    Ok("merged findings".into())
                } else {
                    Ok("partition findings".into())
                }
            }),
        );
        let text = "pr-1\npr-2\npr-3";

        let report = h.engine.run("triage", &trigger(text), text).await.unwrap();

        assert_eq!(report.state, JobState::Done);
        let body = &responses(&h.queue)[0];
        assert!(body.ends_with("merged findings"));

        let shuffle = h
            .events
            .recent(Some(&EventFilter::new().with_job(report.job_id.clone()).with_name("shuffle_done")));
        assert_eq!(
            shuffle[0].event,
            LifecycleEvent::ShuffleDone {
                job_id: report.job_id.clone(),
                partitions: 2,
                skipped_records: 0,
            }
        );
        let merge = h
            .executor
            .calls()
            .into_iter()
            .find(|(p, _, _)| p.starts_with("Merge"))
            .unwrap();
        assert!(merge.0.contains("Records present in several partitions: pr-1"));
    }

    #[tokio::test]
    async fn test_summarize_strategy() {
        let h = harness(
            json!({ "triage": {
                "prompt": "{{items}}",
                "batch_size": 1,
                "reduce": { "strategy": "summarize", "prompt": "SUM {{results}}" }
            } }),
            ScriptedExecutor::new(|prompt, _| {
                Ok(if prompt.starts_with("SUM") { "the summary".into() } else { prompt.to_string() })
            }),
        );
        let report = h.engine.run("triage", &trigger("a\nb"), "a\nb").await.unwrap();

        assert!(responses(&h.queue)[0].ends_with("the summary"));
        let reduce = h
            .events
            .recent(Some(&EventFilter::new().with_job(report.job_id).with_name("reduce_done")));
        assert!(matches!(
            &reduce[0].event,
            LifecycleEvent::ReduceDone { strategy, .. } if strategy == "summarize"
        ));
    }

    #[tokio::test]
    async fn test_item_limit_reported() {
        let settings: Settings = serde_json::from_value(json!({
            "swarms": { "triage": { "prompt": "{{items}}", "batch_size": 2 } }
        }))
        .unwrap();
        let executor = Arc::new(ScriptedExecutor::echo());
        let queue = Arc::new(QueueStore::in_memory(QueueConfig::default()));
        let engine = SwarmEngine::new(
            executor.clone(),
            Arc::clone(&queue),
            EventBus::new(),
            Arc::new(Roster::from_settings(&settings)),
            SwarmLimits::default().with_max_items(3),
        );
        let text = "a\nb\nc\nd\ne";

        engine.run("triage", &trigger(text), text).await.unwrap();

        assert_eq!(executor.calls().len(), 2);
        let body = &responses(&queue)[0];
        assert!(body.starts_with(
            "Swarm triage finished: 2/2 batches succeeded (3 of 5 items; 2 over the item limit were skipped)"
        ));
    }

    #[tokio::test]
    async fn test_long_output_attached() {
        let dir = tempdir().unwrap();
        let settings: Settings = serde_json::from_value(json!({
            "swarms": { "triage": { "prompt": "{{items}}", "batch_size": 1 } }
        }))
        .unwrap();
        let queue = Arc::new(QueueStore::in_memory(QueueConfig::default()));
        let engine = SwarmEngine::new(
            Arc::new(ScriptedExecutor::new(|_, _| Ok("x".repeat(300)))),
            Arc::clone(&queue),
            EventBus::new(),
            Arc::new(Roster::from_settings(&settings)),
            SwarmLimits::default().with_inline_limit(200, 50),
        )
        .with_artifacts(ArtifactStore::new(dir.path()));

        engine.run("triage", &trigger("a\nb"), "a\nb").await.unwrap();

        let response = queue.poll_pending("discord").remove(0);
        assert_eq!(response.files.len(), 1);
        assert!(response.body.contains("chars) attached as"));
        assert_eq!(response.agent.as_deref(), Some("triage"));
    }
}

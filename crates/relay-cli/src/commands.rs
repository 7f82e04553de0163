//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_agent::CommandExecutor;
use relay_core::{ConfigError, Roster, Settings, StatePaths};
use relay_events::{Envelope, EventBus, EventError, EventFilter};
use relay_models::{ConversationId, JobId, ResponseItem, WorkId, WorkItem};
use relay_persistence::RecordStore;
use relay_queue::{QueueConfig, QueueCounts, QueueError, QueueStore};
use relay_runtime::{Runtime, RuntimeConfig, RuntimeError};
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::Commands;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Events(#[from] EventError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// How long shutdown waits for queued events to reach the journal.
const JOURNAL_FLUSH: Duration = Duration::from_secs(2);

fn load_settings(paths: &StatePaths) -> Result<Settings> {
    Ok(Settings::load(&paths.settings_file())?)
}

fn open_queue(paths: &StatePaths, settings: &Settings) -> Result<QueueStore> {
    let config = QueueConfig::new().with_max_retries(settings.queue.max_retries);
    Ok(QueueStore::open(RecordStore::new(paths.queue_dir()), config)?)
}

pub async fn execute(command: Commands, state_dir: &Path) -> Result<()> {
    let paths = StatePaths::new(state_dir);
    paths.ensure_all_dirs()?;
    let settings = load_settings(&paths)?;

    match command {
        Commands::Run => run(&paths, &settings).await,
        Commands::Send {
            message,
            channel,
            sender,
            target,
            files,
        } => {
            let queue = open_queue(&paths, &settings)?;
            let id = send(&queue, &channel, &sender, &message.join(" "), target, &files)?;
            println!("{}", id);
            Ok(())
        }
        Commands::Dead => {
            let queue = open_queue(&paths, &settings)?;
            let dead = queue.dead_letters();
            if dead.is_empty() {
                println!("No dead letters.");
            }
            for item in dead {
                print_work(&item);
            }
            Ok(())
        }
        Commands::Outbox { channel, peek } => {
            let queue = open_queue(&paths, &settings)?;
            let responses = outbox(&queue, &channel, !peek)?;
            if responses.is_empty() {
                println!("No pending responses for {}.", channel);
            }
            for response in responses {
                print_response(&response);
            }
            Ok(())
        }
        Commands::Status => {
            let queue = open_queue(&paths, &settings)?;
            print_counts(&queue.counts());
            Ok(())
        }
        Commands::Events {
            conversation,
            job,
            name,
            limit,
        } => {
            for envelope in events(&paths, conversation, job, name, limit)? {
                println!("{}", serde_json::to_string(&envelope).unwrap_or_default());
            }
            Ok(())
        }
    }
}

async fn run(paths: &StatePaths, settings: &Settings) -> Result<()> {
    let queue = Arc::new(open_queue(paths, settings)?);
    let events = EventBus::new();
    let journal = events.spawn_journal(paths.events_file());
    let executor = Arc::new(CommandExecutor::from_settings(settings));
    let roster = Arc::new(Roster::from_settings(settings));
    let config = RuntimeConfig::from(settings).with_files_dir(paths.files_dir());

    let mut runtime = Runtime::new(config, Arc::clone(&queue), executor, roster, events);
    runtime.start().await?;

    let counts = queue.counts();
    info!(pending = counts.pending, processing = counts.processing, "relay running");
    println!("relay running ({} pending). Press Ctrl+C to stop.", counts.pending);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
    }
    runtime.shutdown().await?;
    drop(runtime);
    if tokio::time::timeout(JOURNAL_FLUSH, journal.finish()).await.is_err() {
        warn!("event journal did not finish writing in time");
    }
    Ok(())
}

/// Enqueues a message and returns its id.
pub fn send(
    queue: &QueueStore,
    channel: &str,
    sender: &str,
    message: &str,
    target: Option<String>,
    files: &[PathBuf],
) -> Result<WorkId> {
    if message.trim().is_empty() {
        return Err(CliError::InvalidInput("message is empty".into()));
    }
    let mut item = WorkItem::new(channel, sender, message).with_files(
        files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
    );
    if let Some(target) = target {
        item = item.with_target(target);
    }
    Ok(queue.enqueue(item)?)
}

/// Pending responses for `channel`. With `ack` each one is claimed for
/// delivery and acknowledged.
pub fn outbox(queue: &QueueStore, channel: &str, ack: bool) -> Result<Vec<ResponseItem>> {
    let pending = queue.poll_pending(channel);
    if !ack {
        return Ok(pending);
    }

    let mut delivered = Vec::with_capacity(pending.len());
    for response in pending {
        let Some(claimed) = queue.claim_for_delivery(&response.id)? else {
            continue;
        };
        queue.ack(&claimed.id)?;
        delivered.push(claimed);
    }
    Ok(delivered)
}

/// The latest `limit` journal events matching the given filters.
pub fn events(
    paths: &StatePaths,
    conversation: Option<String>,
    job: Option<String>,
    name: Option<String>,
    limit: usize,
) -> Result<Vec<Envelope>> {
    let mut filter = EventFilter::new();
    if let Some(id) = conversation {
        filter = filter.with_conversation(ConversationId::from_string(id));
    }
    if let Some(id) = job {
        filter = filter.with_job(JobId::from_string(id));
    }
    if let Some(name) = name {
        filter = filter.with_name(name);
    }

    let mut events = EventBus::read_journal(&paths.events_file(), Some(&filter))?;
    let skip = events.len().saturating_sub(limit);
    Ok(events.split_off(skip))
}

fn print_work(item: &WorkItem) {
    println!(
        "{}  {}/{}  retries={}  {}",
        item.id,
        item.channel,
        item.sender,
        item.retry_count,
        item.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("    {}", item.body.lines().next().unwrap_or(""));
    if let Some(error) = &item.last_error {
        println!("    error: {}", error);
    }
}

fn print_response(response: &ResponseItem) {
    let from = response.agent.as_deref().unwrap_or("relay");
    println!("--- {} -> {} ({})", from, response.destination, response.id);
    println!("{}", response.body);
    for file in &response.files {
        println!("[file] {}", file);
    }
}

fn print_counts(counts: &QueueCounts) {
    println!(
        "work:      {} pending, {} processing, {} completed, {} dead",
        counts.pending, counts.processing, counts.completed, counts.dead
    );
    println!(
        "responses: {} pending, {} delivering, {} acked",
        counts.responses_pending, counts.responses_delivering, counts.responses_acked
    );
}

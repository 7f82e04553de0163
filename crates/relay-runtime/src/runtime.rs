//! Main runtime manager.

use std::sync::Arc;

use relay_agent::SharedExecutor;
use relay_core::Roster;
use relay_events::EventBus;
use relay_queue::QueueStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, RuntimeError};
use crate::sweeper::Sweeper;

/// Main runtime manager combining the dispatcher and the sweeper.
pub struct Runtime {
    dispatcher: Arc<Dispatcher>,
    sweeper: Arc<Sweeper>,
    /// Dispatcher and sweeper tasks.
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: bool,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        queue: Arc<QueueStore>,
        executor: SharedExecutor,
        roster: Arc<Roster>,
        events: EventBus,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.clone(), Arc::clone(&queue), executor, roster, events);
        let sweeper = Sweeper::new(
            queue,
            Arc::clone(dispatcher.tracker()),
            config.stale_threshold,
            config.sweep_interval,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            dispatcher: Arc::new(dispatcher),
            sweeper: Arc::new(sweeper),
            handles: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            started: false,
        }
    }

    /// Start the dispatch loop and the maintenance sweeper.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }

        info!("starting runtime");

        let dispatcher = Arc::clone(&self.dispatcher);
        let shutdown_rx = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            dispatcher.run(shutdown_rx).await;
        }));

        let sweeper = Arc::clone(&self.sweeper);
        let shutdown_rx = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            sweeper.run(shutdown_rx).await;
        }));

        self.started = true;
        debug!("runtime started");
        Ok(())
    }

    /// Stop claiming new work, then wait for the lanes to finish what they
    /// already accepted.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Err(RuntimeError::NotStarted);
        }

        info!("shutting down runtime");

        self.shutdown_tx.send(true).map_err(|e| {
            RuntimeError::Shutdown(format!("failed to send shutdown signal: {}", e))
        })?;

        for handle in self.handles.drain(..) {
            handle
                .await
                .map_err(|e| RuntimeError::Shutdown(format!("background task panicked: {}", e)))?;
        }

        debug!("draining lanes");
        self.dispatcher.drain().await?;

        self.started = false;
        info!("runtime stopped");
        Ok(())
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn sweeper(&self) -> Arc<Sweeper> {
        Arc::clone(&self.sweeper)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.started {
            let _ = self.shutdown_tx.send(true);
        }
    }
}

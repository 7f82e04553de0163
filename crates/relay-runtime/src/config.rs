//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use relay_conversation::ConversationConfig;
use relay_core::Settings;
use relay_swarm::SwarmLimits;

/// Shortest poll or sweep interval; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the dispatcher and its background tasks.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Fallback interval between claim attempts when no wake-up arrives.
    pub poll_interval: Duration,
    /// Claims older than this are returned to pending by the sweeper.
    pub stale_threshold: Duration,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
    pub conversation: ConversationConfig,
    pub swarm: SwarmLimits,
    /// Directory for long responses and swarm reports. Long bodies are
    /// kept inline when unset.
    pub files_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            stale_threshold: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            conversation: ConversationConfig::default(),
            swarm: SwarmLimits::default(),
            files_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_conversation(mut self, conversation: ConversationConfig) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_swarm_limits(mut self, limits: SwarmLimits) -> Self {
        self.swarm = limits;
        self
    }

    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = Some(dir.into());
        self
    }

    /// How often a running turn refreshes its claim. A quarter of the
    /// stale threshold, so a live turn is never swept.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.stale_threshold / 4).max(Duration::from_millis(10))
    }
}

impl From<&Settings> for RuntimeConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.dispatch.poll_interval_ms).max(MIN_INTERVAL),
            stale_threshold: Duration::from_secs(settings.dispatch.stale_threshold_secs),
            sweep_interval: Duration::from_secs(settings.dispatch.sweep_interval_secs).max(MIN_INTERVAL),
            conversation: ConversationConfig::from(&settings.conversation),
            swarm: SwarmLimits::from(settings),
            files_dir: None,
        }
    }
}

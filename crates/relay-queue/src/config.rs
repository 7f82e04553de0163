//! Queue configuration.

/// Default number of failed attempts before a work item is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Configuration for a [`QueueStore`](crate::QueueStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Failed attempts after which a work item becomes dead.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry ceiling. A ceiling of 0 is treated as 1.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

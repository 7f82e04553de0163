//! Engine-wide limits applied on top of each swarm's own settings.

use relay_core::Settings;

/// Default upper bound on any swarm's concurrency.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Default upper bound on the number of items one job accepts.
pub const DEFAULT_MAX_ITEMS: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmLimits {
    pub max_concurrency: usize,
    pub max_items: usize,
    /// Final output longer than this is saved to a file.
    pub max_inline_chars: usize,
    pub preview_chars: usize,
}

impl Default for SwarmLimits {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_items: DEFAULT_MAX_ITEMS,
            max_inline_chars: 4000,
            preview_chars: 1500,
        }
    }
}

impl SwarmLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    pub fn with_inline_limit(mut self, max_inline_chars: usize, preview_chars: usize) -> Self {
        self.max_inline_chars = max_inline_chars;
        self.preview_chars = preview_chars.min(max_inline_chars);
        self
    }

    /// Effective concurrency for a swarm asking for `requested`.
    pub fn concurrency(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_concurrency.max(1))
    }
}

impl From<&Settings> for SwarmLimits {
    fn from(settings: &Settings) -> Self {
        Self::default().with_inline_limit(
            settings.output.max_inline_chars,
            settings.output.preview_chars,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_is_clamped() {
        let limits = SwarmLimits::new().with_max_concurrency(8);
        assert_eq!(limits.concurrency(5), 5);
        assert_eq!(limits.concurrency(0), 1);
        assert_eq!(limits.concurrency(100), 8);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.output.max_inline_chars = 100;
        settings.output.preview_chars = 500;
        let limits = SwarmLimits::from(&settings);
        assert_eq!(limits.max_inline_chars, 100);
        assert_eq!(limits.preview_chars, 100);
    }
}

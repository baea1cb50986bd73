//! Binding configuration

use std::time::Duration;

/// Lifecycle configuration shared by a registry and its bound objects
#[derive(Debug, Clone)]
pub struct BindConfig {
    /// Panic on lifecycle misuse (double bind, double free) instead of
    /// logging and returning an error (default: on in debug builds)
    pub strict: bool,
    /// Interval between background sweeps (default: 100ms)
    pub sweep_interval: Duration,
    /// Pending queue depth that triggers a back-pressure warning (default: 4096)
    pub queue_warn_threshold: usize,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            strict: cfg!(debug_assertions),
            sweep_interval: Duration::from_millis(100),
            queue_warn_threshold: 4096,
        }
    }
}

impl BindConfig {
    /// Configuration that logs lifecycle misuse instead of panicking
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    /// Configuration that panics on lifecycle misuse
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Set the background sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the pending queue warning threshold
    pub fn with_queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.queue_warn_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strictness_follows_build() {
        assert_eq!(BindConfig::default().strict, cfg!(debug_assertions));
        assert!(!BindConfig::lenient().strict);
        assert!(BindConfig::strict().strict);
    }

    #[test]
    fn test_builders() {
        let config = BindConfig::lenient()
            .with_sweep_interval(Duration::from_millis(5))
            .with_queue_warn_threshold(8);
        assert_eq!(config.sweep_interval, Duration::from_millis(5));
        assert_eq!(config.queue_warn_threshold, 8);
        assert!(!config.strict);
    }
}

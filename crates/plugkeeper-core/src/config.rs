// ── Runtime manager configuration ──
//
// Describes which labels to manage and how aggressively to poll them.
// Core never reads config files; `plugkeeper-config` (or the embedding
// program) builds a `ManagerConfig` and hands it to the builder.

use std::time::Duration;

use crate::device::Label;

/// Exponential backoff applied to discovery after consecutive failures.
///
/// Without a policy the manager retries discovery on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryBackoff {
    /// Window after the first failure. Default: 5s.
    pub initial_delay: Duration,

    /// Upper bound on the window. Default: 5min.
    pub max_delay: Duration,
}

impl Default for DiscoveryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl DiscoveryBackoff {
    /// Window to wait after the `attempt`-th consecutive failure (0-based).
    /// Doubles each attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Configuration for a single manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Labels under management. Fixed for the manager's lifetime.
    pub labels: Vec<Label>,
    /// Time between reconciliation ticks.
    pub poll_interval: Duration,
    /// Upper bound on any single discovery or device call.
    pub io_timeout: Duration,
    /// How many devices are polled concurrently within one tick.
    pub max_concurrency: usize,
    /// Optional backoff for failing discovery.
    pub discovery_backoff: Option<DiscoveryBackoff>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            poll_interval: Duration::from_secs(10),
            io_timeout: Duration::from_secs(5),
            max_concurrency: 8,
            discovery_backoff: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = DiscoveryBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(200), Duration::from_secs(10));
    }

    #[test]
    fn default_config_retries_discovery_every_tick() {
        let config = ManagerConfig::default();
        assert!(config.discovery_backoff.is_none());
        assert!(config.labels.is_empty());
    }
}

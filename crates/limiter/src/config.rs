use std::sync::atomic::{AtomicU64, Ordering};

/// Global rate thresholds, all mutable at runtime.
///
/// Admin surfaces call the setters directly; the scheduler reads the
/// current values on every tick, so changes take effect within one tick.
#[derive(Debug)]
pub struct RateLimiterConfig {
    /// Baseline for an upload with no explicit rate, in KB/s.
    default_rate_per_request_kb: AtomicU64,
    /// Floor applied after global fair-sharing, in KB/s.
    minimum_rate_per_request_kb: AtomicU64,
    /// Baseline rate per distinct client, in KB/s.
    default_rate_per_client_kb: AtomicU64,
    /// Hard per-client cap, in KB/s.
    maximum_rate_per_client_kb: AtomicU64,
    /// Hard global cap, in KB/s.
    maximum_over_all_rate_kb: AtomicU64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_rate_per_request_kb: AtomicU64::new(1024),
            minimum_rate_per_request_kb: AtomicU64::new(1),
            default_rate_per_client_kb: AtomicU64::new(10 * 1024),
            maximum_rate_per_client_kb: AtomicU64::new(10 * 1024),
            maximum_over_all_rate_kb: AtomicU64::new(10 * 1024),
        }
    }
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_rate_per_request_kb(&self) -> u64 {
        self.default_rate_per_request_kb.load(Ordering::Relaxed)
    }

    pub fn set_default_rate_per_request_kb(&self, kb: u64) {
        self.default_rate_per_request_kb.store(kb, Ordering::Relaxed);
    }

    pub fn minimum_rate_per_request_kb(&self) -> u64 {
        self.minimum_rate_per_request_kb.load(Ordering::Relaxed)
    }

    pub fn set_minimum_rate_per_request_kb(&self, kb: u64) {
        self.minimum_rate_per_request_kb.store(kb, Ordering::Relaxed);
    }

    pub fn default_rate_per_client_kb(&self) -> u64 {
        self.default_rate_per_client_kb.load(Ordering::Relaxed)
    }

    pub fn set_default_rate_per_client_kb(&self, kb: u64) {
        self.default_rate_per_client_kb.store(kb, Ordering::Relaxed);
    }

    pub fn maximum_rate_per_client_kb(&self) -> u64 {
        self.maximum_rate_per_client_kb.load(Ordering::Relaxed)
    }

    pub fn set_maximum_rate_per_client_kb(&self, kb: u64) {
        self.maximum_rate_per_client_kb.store(kb, Ordering::Relaxed);
    }

    pub fn maximum_over_all_rate_kb(&self) -> u64 {
        self.maximum_over_all_rate_kb.load(Ordering::Relaxed)
    }

    pub fn set_maximum_over_all_rate_kb(&self, kb: u64) {
        self.maximum_over_all_rate_kb.store(kb, Ordering::Relaxed);
    }

    /// Per-tick cap for one client, in bytes.
    pub(crate) fn client_budget_bytes(&self, tick_ms: u64) -> u64 {
        self.maximum_rate_per_client_kb() * 1024 * tick_ms / 1000
    }

    /// Per-tick global budget, in bytes.
    pub(crate) fn overall_budget_bytes(&self, tick_ms: u64) -> u64 {
        self.maximum_over_all_rate_kb() * 1024 * tick_ms / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = RateLimiterConfig::new();
        assert_eq!(config.default_rate_per_request_kb(), 1024);
        assert_eq!(config.minimum_rate_per_request_kb(), 1);
        assert_eq!(config.default_rate_per_client_kb(), 10240);
        assert_eq!(config.maximum_rate_per_client_kb(), 10240);
        assert_eq!(config.maximum_over_all_rate_kb(), 10240);
    }

    #[test]
    fn setters_take_effect() {
        let config = RateLimiterConfig::new();
        config.set_maximum_over_all_rate_kb(2048);
        assert_eq!(config.maximum_over_all_rate_kb(), 2048);
    }

    #[test]
    fn client_budget_follows_the_hard_cap_only() {
        let config = RateLimiterConfig::new();
        config.set_maximum_rate_per_client_kb(8);
        assert_eq!(config.client_budget_bytes(1000), 8 * 1024);

        // The per-client baseline knob does not tighten the cap.
        config.set_default_rate_per_client_kb(4);
        assert_eq!(config.client_budget_bytes(1000), 8 * 1024);
    }

    #[test]
    fn budgets_scale_with_tick_period() {
        let config = RateLimiterConfig::new();
        assert_eq!(
            config.overall_budget_bytes(100),
            10240 * 1024 / 10
        );
    }
}

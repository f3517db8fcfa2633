use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::registry::DEFAULT_IDLE_TIMEOUT;
use crate::{ConfigurationRegistry, RateLimiterConfig, UploadProcessingConfiguration};

/// Default scheduling period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(1000);

/// Construction-time settings for the [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Period between allowance reassignments.
    pub tick_period: Duration,
    /// Idle window for configuration eviction.
    pub idle_timeout: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// The token-bucket scheduler.
///
/// Owns the upload configuration registry and the global rate thresholds.
/// [`start`](Self::start) spawns one ticker task; every tick it reassigns
/// each active upload's byte allowance and wakes parked workers. Workers
/// call [`wait_for_tick`](Self::wait_for_tick) when their allowance runs
/// out.
pub struct RateLimiter {
    config: RateLimiterConfig,
    registry: ConfigurationRegistry,
    tick: Notify,
    cancel: CancellationToken,
    tick_period: Duration,
    started: AtomicBool,
}

impl RateLimiter {
    pub fn new(settings: LimiterSettings) -> Arc<Self> {
        Arc::new(Self {
            config: RateLimiterConfig::new(),
            registry: ConfigurationRegistry::new(settings.idle_timeout),
            tick: Notify::new(),
            cancel: CancellationToken::new(),
            tick_period: settings.tick_period,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConfigurationRegistry {
        &self.registry
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// Spawns the ticker task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("rate limiter already started");
            return;
        }
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.tick_period);
            loop {
                tokio::select! {
                    _ = limiter.cancel.cancelled() => {
                        tracing::debug!("rate limiter shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.apportion();
                    }
                }
            }
        });
    }

    /// Stops the ticker task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Parks until the next allowance reassignment.
    pub async fn wait_for_tick(&self) {
        self.tick.notified().await;
    }

    /// One scheduling pass: observe last tick's consumption, hand out this
    /// tick's credits, wake the workers.
    fn apportion(&self) {
        let tick_ms = self.tick_period.as_millis() as u64;
        self.registry.evict_idle();
        let entries = self.registry.entries();

        let default_kb = self.config.default_rate_per_request_kb();
        let minimum_bytes = self.config.minimum_rate_per_request_kb() * 1024 * tick_ms / 1000;
        let client_budget = self.config.client_budget_bytes(tick_ms);
        let overall_budget = self.config.overall_budget_bytes(tick_ms);

        let mut shares: Vec<(Arc<UploadProcessingConfiguration>, u64)> = Vec::new();
        for (_, config) in &entries {
            config.observe_consumption(tick_ms);
            if config.is_paused() || config.is_cancelled() {
                config.assign_allowance(0);
                continue;
            }
            let rate_kb = config.desired_rate_kb().unwrap_or(default_kb);
            shares.push((config.clone(), rate_kb * 1024 * tick_ms / 1000));
        }

        // Per-client cap: scale a client's requests down proportionally.
        let mut per_client: HashMap<String, u64> = HashMap::new();
        for (config, credit) in &shares {
            if let Some(client) = config.client_id() {
                *per_client.entry(client).or_default() += *credit;
            }
        }
        for (config, credit) in &mut shares {
            if let Some(client) = config.client_id() {
                let total = per_client[&client];
                if total > client_budget {
                    *credit = (*credit as f64 * client_budget as f64 / total as f64) as u64;
                }
            }
        }

        // Global cap: scale everyone, but never below the per-request
        // minimum.
        let total: u64 = shares.iter().map(|(_, credit)| *credit).sum();
        if total > overall_budget {
            let factor = overall_budget as f64 / total as f64;
            for (_, credit) in &mut shares {
                *credit = ((*credit as f64 * factor) as u64).max(minimum_bytes);
            }
        }

        for (config, credit) in &shares {
            config.assign_allowance(*credit as i64);
        }
        if !shares.is_empty() {
            tracing::trace!(active = shares.len(), "allowances reassigned");
        }
        self.tick.notify_waiters();
    }
}

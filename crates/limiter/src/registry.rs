use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::UploadProcessingConfiguration;

/// Default idle window after which an untouched configuration is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Demand-created map of `file_id -> UploadProcessingConfiguration`.
///
/// The first access for a file id allocates a zeroed configuration; entries
/// not touched within the idle window are reaped by the scheduler tick
/// (unless a worker is actively processing them).
pub struct ConfigurationRegistry {
    entries: RwLock<HashMap<String, Arc<UploadProcessingConfiguration>>>,
    idle_timeout: Duration,
}

impl ConfigurationRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Returns the configuration for `file_id`, creating it on first use.
    pub fn get(&self, file_id: &str) -> Arc<UploadProcessingConfiguration> {
        if let Some(config) = self.peek(file_id) {
            return config;
        }
        let mut entries = self.entries.write().unwrap();
        // A racing caller may have inserted between the read and the write
        // lock; entry() keeps the winner.
        let config = entries
            .entry(file_id.to_string())
            .or_insert_with(|| {
                tracing::trace!(file_id, "created upload configuration");
                Arc::new(UploadProcessingConfiguration::new())
            })
            .clone();
        config.touch();
        config
    }

    /// Returns the configuration only if it already exists.
    pub fn peek(&self, file_id: &str) -> Option<Arc<UploadProcessingConfiguration>> {
        let entries = self.entries.read().unwrap();
        let config = entries.get(file_id).cloned();
        if let Some(config) = &config {
            config.touch();
        }
        config
    }

    /// All current entries, in no particular order.
    pub fn entries(&self) -> Vec<(String, Arc<UploadProcessingConfiguration>)> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .map(|(id, config)| (id.clone(), config.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    pub fn pause(&self, file_id: &str) {
        self.get(file_id).pause();
    }

    pub fn resume(&self, file_id: &str) {
        self.get(file_id).resume();
    }

    /// Flags the upload for cancellation. Returns whether a configuration
    /// existed, i.e. whether anything may currently be processing it.
    pub fn mark_cancel(&self, file_id: &str) -> bool {
        match self.peek(file_id) {
            Some(config) => {
                config.mark_cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, file_id: &str) -> bool {
        self.get(file_id).is_cancelled()
    }

    /// Clears `paused` and `cancel` for the id.
    pub fn reset(&self, file_id: &str) {
        self.get(file_id).reset();
    }

    pub fn assign_rate(&self, file_id: &str, kb: Option<u64>) {
        self.get(file_id).assign_rate(kb);
    }

    pub fn allowance(&self, file_id: &str) -> i64 {
        self.get(file_id).allowance()
    }

    /// Drops entries idle past the window. Never evicts an entry a worker
    /// is actively processing.
    pub fn evict_idle(&self) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|file_id, config| {
            let keep = config.is_processing() || config.idle_for() < self.idle_timeout;
            if !keep {
                tracing::debug!(%file_id, "evicting idle upload configuration");
            }
            keep
        });
    }
}

impl Default for ConfigurationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_demand_creates_zeroed_entry() {
        let registry = ConfigurationRegistry::default();
        assert!(registry.is_empty());
        let config = registry.get("f1");
        assert_eq!(config.allowance(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_returns_same_entry() {
        let registry = ConfigurationRegistry::default();
        let a = registry.get("f1");
        a.assign_rate(Some(77));
        let b = registry.get("f1");
        assert_eq!(b.desired_rate_kb(), Some(77));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn peek_does_not_create() {
        let registry = ConfigurationRegistry::default();
        assert!(registry.peek("f1").is_none());
        registry.get("f1");
        assert!(registry.peek("f1").is_some());
    }

    #[test]
    fn mark_cancel_reports_existence() {
        let registry = ConfigurationRegistry::default();
        assert!(!registry.mark_cancel("f1"));
        registry.get("f1");
        assert!(registry.mark_cancel("f1"));
        assert!(registry.is_cancelled("f1"));
    }

    #[test]
    fn pause_and_resume_toggle_flag() {
        let registry = ConfigurationRegistry::default();
        registry.pause("f1");
        assert!(registry.get("f1").is_paused());
        registry.resume("f1");
        assert!(!registry.get("f1").is_paused());
    }

    #[test]
    fn reset_clears_both_flags() {
        let registry = ConfigurationRegistry::default();
        registry.pause("f1");
        registry.get("f1").mark_cancel();
        registry.reset("f1");
        let config = registry.get("f1");
        assert!(!config.is_paused());
        assert!(!config.is_cancelled());
    }

    #[test]
    fn idle_entries_are_evicted() {
        let registry = ConfigurationRegistry::new(Duration::from_millis(0));
        registry.get("f1");
        registry.evict_idle();
        assert!(registry.is_empty());
    }

    #[test]
    fn fresh_entries_survive_eviction() {
        let registry = ConfigurationRegistry::new(Duration::from_secs(60));
        registry.get("f1");
        registry.evict_idle();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn processing_entries_survive_eviction() {
        let registry = ConfigurationRegistry::new(Duration::from_millis(0));
        let config = registry.get("f1");
        assert!(config.try_begin_processing());
        registry.evict_idle();
        assert_eq!(registry.len(), 1);

        config.end_processing();
        registry.evict_idle();
        assert!(registry.is_empty());
    }
}

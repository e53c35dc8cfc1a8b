//! Time-bounded record of recently demoted/removed brokers (C9).
//!
//! Operators call out a broker as demoted or removed so later proposal
//! generation can treat it specially; that marker should eventually expire
//! unless the caller pins it permanently. `PERMANENT` is the sentinel for
//! "never expires" rather than `Option<Instant>`, so the expiry comparison
//! stays a single unconditional arithmetic check at read time.

#[cfg(test)]
#[path = "history_test.rs"]
mod history_test;

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::HistoryConfig;
use crate::types::BrokerId;

/// Sentinel recorded-at timestamp meaning "never expires".
pub const PERMANENT: u64 = u64::MAX;

#[derive(Debug, Default)]
struct HistoryData {
    demoted: HashMap<BrokerId, u64>,
    removed: HashMap<BrokerId, u64>,
}

/// Tracks when each broker was last demoted or removed, expiring entries
/// older than the configured retention window.
#[derive(Debug)]
pub struct BrokerHistory {
    data: RwLock<HistoryData>,
    demotion_retention_ms: u64,
    removal_retention_ms: u64,
}

impl BrokerHistory {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            data: RwLock::new(HistoryData::default()),
            demotion_retention_ms: config.demotion_history_retention_ms,
            removal_retention_ms: config.removal_history_retention_ms,
        }
    }

    fn is_live(recorded_at_ms: u64, retention_ms: u64, now_ms: u64) -> bool {
        recorded_at_ms == PERMANENT || now_ms.saturating_sub(recorded_at_ms) <= retention_ms
    }

    /// Record `broker` as demoted at `now_ms`, or permanently if `permanent`.
    pub fn add_to_demotion_history(&self, broker: BrokerId, now_ms: u64, permanent: bool) {
        let mut d = self.data.write().expect("broker history lock poisoned");
        d.demoted.insert(broker, if permanent { PERMANENT } else { now_ms });
    }

    pub fn add_to_removal_history(&self, broker: BrokerId, now_ms: u64, permanent: bool) {
        let mut d = self.data.write().expect("broker history lock poisoned");
        d.removed.insert(broker, if permanent { PERMANENT } else { now_ms });
    }

    /// Brokers with a still-live demotion entry as of `now_ms`.
    pub fn recently_demoted(&self, now_ms: u64) -> Vec<BrokerId> {
        let d = self.data.read().expect("broker history lock poisoned");
        d.demoted
            .iter()
            .filter(|(_, &at)| Self::is_live(at, self.demotion_retention_ms, now_ms))
            .map(|(&b, _)| b)
            .collect()
    }

    pub fn recently_removed(&self, now_ms: u64) -> Vec<BrokerId> {
        let d = self.data.read().expect("broker history lock poisoned");
        d.removed
            .iter()
            .filter(|(_, &at)| Self::is_live(at, self.removal_retention_ms, now_ms))
            .map(|(&b, _)| b)
            .collect()
    }

    pub fn clear_demotion(&self, broker: BrokerId) {
        self.data.write().expect("broker history lock poisoned").demoted.remove(&broker);
    }

    pub fn clear_removal(&self, broker: BrokerId) {
        self.data.write().expect("broker history lock poisoned").removed.remove(&broker);
    }

    /// Evicts entries that have aged out, so the maps don't grow unbounded
    /// across the lifetime of a long-running executor.
    pub fn evict_expired(&self, now_ms: u64) {
        let mut d = self.data.write().expect("broker history lock poisoned");
        d.demoted.retain(|_, &mut at| Self::is_live(at, self.demotion_retention_ms, now_ms));
        d.removed.retain(|_, &mut at| Self::is_live(at, self.removal_retention_ms, now_ms));
    }
}

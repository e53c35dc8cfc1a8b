//! Per-broker and cluster-wide concurrency caps (C2).
//!
//! Caps are published as an immutable snapshot behind an [`arc_swap::ArcSwap`],
//! the same publish-by-atomic-pointer-swap idiom used for
//! [`crate::phase::ExecutorState`]: writers build a new [`ConcurrencyCaps`]
//! and swap it in; readers get a consistent point-in-time view without
//! taking a lock.

#[cfg(test)]
#[path = "concurrency_manager_test.rs"]
mod concurrency_manager_test;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::ConcurrencyDimensionBounds;
use crate::phase::ConcurrencySummary;
use crate::types::{BrokerId, ConcurrencyType};

/// An immutable snapshot of every dimension's caps.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyCaps {
    per_broker: HashMap<ConcurrencyType, HashMap<BrokerId, u32>>,
    inter_broker_cluster: u32,
    leader_cluster: u32,
}

impl ConcurrencyCaps {
    pub fn broker_cap(&self, dim: ConcurrencyType, broker: BrokerId) -> Option<u32> {
        self.per_broker.get(&dim).and_then(|m| m.get(&broker)).copied()
    }

    pub fn cluster_cap(&self, dim: ConcurrencyType) -> Option<u32> {
        match dim {
            ConcurrencyType::InterBrokerReplica => Some(self.inter_broker_cluster),
            ConcurrencyType::LeaderCluster => Some(self.leader_cluster),
            _ => None,
        }
    }
}

/// Holds the four cap tables (inter-broker, intra-broker, leader-per-broker,
/// plus the inter-broker and leader cluster-wide caps) and clamps every
/// mutation into `[MIN, MAX]` for its dimension.
#[derive(Debug)]
pub struct ConcurrencyManager {
    bounds: ConcurrencyDimensionBounds,
    caps: ArcSwap<ConcurrencyCaps>,
}

impl ConcurrencyManager {
    pub fn new(bounds: ConcurrencyDimensionBounds) -> Self {
        Self { bounds, caps: ArcSwap::from_pointee(ConcurrencyCaps::default()) }
    }

    fn clamp(&self, dim: ConcurrencyType, value: u32) -> u32 {
        let b = self.bounds.get(dim);
        value.clamp(b.min, b.max)
    }

    /// Seed per-broker caps for `brokers` from `requested`, falling back to
    /// the dimension's default (its configured minimum-increase baseline:
    /// the `MIN` bound) when no override was requested.
    pub fn initialize(
        &self,
        brokers: &[BrokerId],
        requested: &HashMap<ConcurrencyType, u32>,
    ) {
        let mut next = (**self.caps.load()).clone();
        for dim in [
            ConcurrencyType::InterBrokerReplica,
            ConcurrencyType::IntraBrokerReplica,
            ConcurrencyType::LeaderPerBroker,
        ] {
            let value = requested.get(&dim).copied().unwrap_or_else(|| self.bounds.get(dim).max);
            let clamped = self.clamp(dim, value);
            let table = next.per_broker.entry(dim).or_default();
            for &broker in brokers {
                table.insert(broker, clamped);
            }
        }
        let inter_broker_cluster_req = requested
            .get(&ConcurrencyType::InterBrokerReplica)
            .copied()
            .unwrap_or_else(|| self.bounds.get(ConcurrencyType::InterBrokerReplica).max);
        next.inter_broker_cluster = self.clamp(ConcurrencyType::InterBrokerReplica, inter_broker_cluster_req);
        let leader_cluster_req = requested
            .get(&ConcurrencyType::LeaderCluster)
            .copied()
            .unwrap_or_else(|| self.bounds.get(ConcurrencyType::LeaderCluster).max);
        next.leader_cluster = self.clamp(ConcurrencyType::LeaderCluster, leader_cluster_req);
        self.caps.store(Arc::new(next));
    }

    /// Uniformly set every broker's cap for `dim` (and the cluster cap, for
    /// cluster-scoped dimensions) to `concurrency`, clamped into bounds.
    pub fn set_for_all_brokers_or_cluster(&self, dim: ConcurrencyType, concurrency: u32) {
        let clamped = self.clamp(dim, concurrency);
        let mut next = (**self.caps.load()).clone();
        match dim {
            ConcurrencyType::InterBrokerReplica => {
                next.inter_broker_cluster = clamped;
                let table = next.per_broker.entry(dim).or_default();
                for v in table.values_mut() {
                    *v = clamped;
                }
            }
            ConcurrencyType::LeaderCluster => {
                next.leader_cluster = clamped;
            }
            ConcurrencyType::IntraBrokerReplica | ConcurrencyType::LeaderPerBroker => {
                let table = next.per_broker.entry(dim).or_default();
                for v in table.values_mut() {
                    *v = clamped;
                }
            }
        }
        self.caps.store(Arc::new(next));
    }

    /// Set a single broker's cap for `dim`, clamped into bounds. A no-op
    /// increase past `MAX` or decrease past `MIN` is absorbed by the clamp.
    pub fn set_for_broker(&self, broker: BrokerId, dim: ConcurrencyType, concurrency: u32) {
        let clamped = self.clamp(dim, concurrency);
        let mut next = (**self.caps.load()).clone();
        next.per_broker.entry(dim).or_default().insert(broker, clamped);
        self.caps.store(Arc::new(next));
    }

    pub fn bounds(&self, dim: ConcurrencyType) -> crate::config::DimensionBound {
        self.bounds.get(dim)
    }

    /// Brokers with a seeded cap for `dim`, for per-broker adjustment loops.
    pub fn brokers_with_cap(&self, dim: ConcurrencyType) -> Vec<BrokerId> {
        self.caps.load().per_broker.get(&dim).map(|table| table.keys().copied().collect()).unwrap_or_default()
    }

    /// Consistent, lock-free snapshot for admission decisions.
    pub fn snapshot(&self) -> Arc<ConcurrencyCaps> {
        self.caps.load_full()
    }

    /// True once [`Self::initialize`] has seeded at least one broker's caps.
    pub fn is_initialized(&self) -> bool {
        self.caps.load().per_broker.values().any(|table| !table.is_empty())
    }

    /// Min/max/avg over the per-broker caps of `dim`, for status reporting.
    pub fn get_execution_concurrency_summary(&self, dim: ConcurrencyType) -> ConcurrencySummary {
        let caps = self.caps.load();
        let Some(table) = caps.per_broker.get(&dim) else {
            return ConcurrencySummary::default();
        };
        if table.is_empty() {
            return ConcurrencySummary::default();
        }
        let min = *table.values().min().unwrap();
        let max = *table.values().max().unwrap();
        let avg = table.values().copied().map(f64::from).sum::<f64>() / table.len() as f64;
        ConcurrencySummary { min, max, avg }
    }
}

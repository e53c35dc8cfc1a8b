//! Configuration for the execution core: progress-check cadence, history
//! retention, the concurrency adjuster's AIMD constants, and the MinISR
//! cache bounds. Mirrors the shape of `apollo_consensus::config`, minus its
//! `apollo_config`-based dumping (a workspace-internal framework this crate
//! does not depend on) in favor of plain `serde` + `validator`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::ConcurrencyType;

/// Top-level configuration for the execution core.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExecutorConfig {
    /// Default poll interval for the progress-check loop (clamped to
    /// `[min_execution_progress_check_interval_ms, requested-or-default]`).
    #[validate(range(min = 1))]
    pub execution_progress_check_interval_ms: u64,
    /// Hard floor for the progress-check interval.
    #[validate(range(min = 1))]
    pub min_execution_progress_check_interval_ms: u64,
    /// Per-leader-task deadline.
    #[validate(range(min = 1))]
    pub leader_movement_timeout_ms: u64,
    /// Rate limit between repeated slow-task alerts for the same task.
    #[validate(range(min = 1))]
    pub slow_task_alerting_backoff_ms: u64,
    /// Replication throttle applied to brokers participating in an
    /// in-progress inter-broker move.
    #[validate(range(min = 1))]
    pub replication_throttle_bytes_per_sec: u64,
    #[validate(nested)]
    pub history: HistoryConfig,
    #[validate(nested)]
    pub concurrency_adjuster: ConcurrencyAdjusterConfig,
    #[validate(nested)]
    pub min_isr_cache: MinIsrCacheConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            execution_progress_check_interval_ms: 10_000,
            min_execution_progress_check_interval_ms: 1_000,
            leader_movement_timeout_ms: 180_000,
            slow_task_alerting_backoff_ms: 60_000,
            replication_throttle_bytes_per_sec: 10_000_000,
            history: HistoryConfig::default(),
            concurrency_adjuster: ConcurrencyAdjusterConfig::default(),
            min_isr_cache: MinIsrCacheConfig::default(),
        }
    }
}

/// Retention for [`crate::history::BrokerHistory`] entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct HistoryConfig {
    #[validate(range(min = 1))]
    pub demotion_history_retention_ms: u64,
    #[validate(range(min = 1))]
    pub removal_history_retention_ms: u64,
    /// Period of the periodic eviction sweep (C9).
    #[validate(range(min = 1))]
    pub scan_interval_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            demotion_history_retention_ms: 24 * 60 * 60 * 1000,
            removal_history_retention_ms: 24 * 60 * 60 * 1000,
            scan_interval_ms: 60_000,
        }
    }
}

/// Per-dimension AIMD constants and per-dimension enable flags for
/// [`crate::concurrency_adjuster::ConcurrencyAdjuster`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConcurrencyAdjusterConfig {
    /// Tick period for the adjuster.
    #[validate(range(min = 1))]
    pub interval_ms: u64,
    /// Run the metric-based path every `num_min_isr_check`-th tick.
    #[validate(range(min = 1))]
    pub num_min_isr_check: u32,
    pub min_isr_check_enabled: bool,
    pub inter_broker_enabled: bool,
    pub intra_broker_enabled: bool,
    pub leader_per_broker_enabled: bool,
    pub leader_cluster_enabled: bool,
    /// Number of Under-MinISR partitions that triggers a stop recommendation.
    #[validate(range(min = 1))]
    pub stop_execution_under_min_isr_threshold: u64,
    pub bounds: ConcurrencyDimensionBounds,
    /// Broker-metric rules consulted for the metric-based recommendation
    /// path (only reached when ISR health recommends no change). Empty by
    /// default: a deployment opts in by listing rules.
    pub metric_rules: Vec<MetricRule>,
}

/// Which side of `threshold` a [`MetricRule`] treats as overloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricDirection {
    /// `value > threshold` is overloaded (e.g. CPU utilization).
    Above,
    /// `value < threshold` is overloaded (e.g. free disk headroom).
    Below,
}

/// One `{metric, threshold, direction}` rule the concurrency adjuster
/// evaluates per broker on a metric-check tick. A broker whose reported
/// value for `metric` crosses `threshold` in the overloaded direction
/// recommends a concurrency decrease for that broker; a broker matching no
/// rule recommends an increase (healthy creep-up).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRule {
    pub metric: String,
    pub threshold: f64,
    pub direction: MetricDirection,
}

impl Default for ConcurrencyAdjusterConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            num_min_isr_check: 5,
            min_isr_check_enabled: true,
            inter_broker_enabled: true,
            intra_broker_enabled: true,
            leader_per_broker_enabled: true,
            leader_cluster_enabled: true,
            stop_execution_under_min_isr_threshold: 1,
            bounds: ConcurrencyDimensionBounds::default(),
            metric_rules: Vec::new(),
        }
    }
}

/// `MIN`/`MAX`/additive-increase/multiplicative-decrease per
/// [`ConcurrencyType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyDimensionBounds {
    pub bounds: HashMap<ConcurrencyTypeKey, DimensionBound>,
}

/// A serde/hash-friendly mirror of [`ConcurrencyType`] for use as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcurrencyTypeKey {
    InterBrokerReplica,
    IntraBrokerReplica,
    LeaderPerBroker,
    LeaderCluster,
}

impl From<ConcurrencyType> for ConcurrencyTypeKey {
    fn from(t: ConcurrencyType) -> Self {
        match t {
            ConcurrencyType::InterBrokerReplica => ConcurrencyTypeKey::InterBrokerReplica,
            ConcurrencyType::IntraBrokerReplica => ConcurrencyTypeKey::IntraBrokerReplica,
            ConcurrencyType::LeaderPerBroker => ConcurrencyTypeKey::LeaderPerBroker,
            ConcurrencyType::LeaderCluster => ConcurrencyTypeKey::LeaderCluster,
        }
    }
}

/// One dimension's AIMD bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DimensionBound {
    pub min: u32,
    pub max: u32,
    pub additive_increase: u32,
    pub multiplicative_decrease: u32,
}

impl ConcurrencyDimensionBounds {
    pub fn get(&self, t: ConcurrencyType) -> DimensionBound {
        *self
            .bounds
            .get(&t.into())
            .unwrap_or_else(|| panic!("no bounds configured for concurrency dimension {t}"))
    }
}

impl Default for ConcurrencyDimensionBounds {
    fn default() -> Self {
        let mut bounds = HashMap::new();
        bounds.insert(
            ConcurrencyTypeKey::InterBrokerReplica,
            DimensionBound { min: 1, max: 1000, additive_increase: 1, multiplicative_decrease: 2 },
        );
        bounds.insert(
            ConcurrencyTypeKey::IntraBrokerReplica,
            DimensionBound { min: 1, max: 1000, additive_increase: 1, multiplicative_decrease: 2 },
        );
        bounds.insert(
            ConcurrencyTypeKey::LeaderPerBroker,
            DimensionBound { min: 1, max: 1000, additive_increase: 1, multiplicative_decrease: 2 },
        );
        bounds.insert(
            ConcurrencyTypeKey::LeaderCluster,
            DimensionBound { min: 1, max: 10000, additive_increase: 10, multiplicative_decrease: 2 },
        );
        Self { bounds }
    }
}

/// Bounds for the [`crate::min_isr_cache::MinIsrCache`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct MinIsrCacheConfig {
    #[validate(range(min = 1))]
    pub cache_size: usize,
    #[validate(range(min = 1))]
    pub cache_retention_ms: u64,
}

impl Default for MinIsrCacheConfig {
    fn default() -> Self {
        Self { cache_size: 10_000, cache_retention_ms: 5 * 60 * 1000 }
    }
}

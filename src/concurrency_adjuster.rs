//! Periodic AIMD control loop over the concurrency caps (C5).
//!
//! On each tick, [`ConcurrencyType::InterBrokerReplica`] and
//! [`ConcurrencyType::LeaderPerBroker`] are evaluated independently and only
//! while the executor is in the matching [`Phase`] — `IntraBrokerReplica` is
//! never adjusted here. ISR health takes priority: a partition sitting
//! exactly At-MinISR recommends a per-broker decrease for every broker in its
//! shrunk ISR, and enough Under-MinISR partitions recommends stopping the
//! execution outright. Only when ISR health recommends no change, and only
//! on every `num_min_isr_check`-th tick, does a broker-metric rule evaluation
//! get a say — deciding per broker, not cluster-wide, whether to additively
//! increase or multiplicatively decrease that broker's cap.
//! `ConcurrencyType::LeaderCluster` never gets its own health check; it
//! piggybacks on `LeaderPerBroker`'s per-tick outcome whenever both are
//! enabled.

#[cfg(test)]
#[path = "concurrency_adjuster_test.rs"]
mod concurrency_adjuster_test;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{ConcurrencyAdjusterConfig, MetricDirection, MetricRule};
use crate::concurrency_manager::ConcurrencyManager;
use crate::min_isr_cache::MinIsrCache;
use crate::phase::Phase;
use crate::types::{AdminInterface, BrokerId, ClusterSnapshot, ConcurrencyType, LoadMonitor};

/// What the caller should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjusterRecommendation {
    /// Caps were adjusted; execution should continue.
    Continue,
    /// The cluster has `under_min_isr_count` partitions below their
    /// configured minimum in-sync replica count; execution should stop.
    StopExecution { under_min_isr_count: u64 },
}

/// ISR-health-derived recommendation for one tick, shared by both dimensions
/// since ISR health is a cluster-wide fact, not a per-dimension one.
#[derive(Debug, Clone)]
enum IsrReco {
    /// Enough Under-MinISR partitions to stop the whole execution.
    Stop { under_min_isr_count: u64 },
    /// At-MinISR partitions found; these brokers' caps should shrink.
    Decrease(HashSet<BrokerId>),
    NoChange,
}

/// Per-broker outcome of the metric-rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricRecommendation {
    Increase,
    Decrease,
}

/// Aggregate direction fed to the `LeaderCluster` piggyback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdjustDirection {
    Increase,
    Decrease,
}

/// Periodically widens or narrows the per-dimension concurrency caps based
/// on observed cluster health.
pub struct ConcurrencyAdjuster {
    config: ConcurrencyAdjusterConfig,
    concurrency: Arc<ConcurrencyManager>,
    min_isr_cache: Arc<MinIsrCache>,
    tick_count: AtomicU64,
    inter_broker_enabled: AtomicBool,
    intra_broker_enabled: AtomicBool,
    leader_per_broker_enabled: AtomicBool,
    leader_cluster_enabled: AtomicBool,
    min_isr_check_enabled: AtomicBool,
}

impl ConcurrencyAdjuster {
    pub fn new(
        config: ConcurrencyAdjusterConfig,
        concurrency: Arc<ConcurrencyManager>,
        min_isr_cache: Arc<MinIsrCache>,
    ) -> Self {
        let inter_broker_enabled = AtomicBool::new(config.inter_broker_enabled);
        let intra_broker_enabled = AtomicBool::new(config.intra_broker_enabled);
        let leader_per_broker_enabled = AtomicBool::new(config.leader_per_broker_enabled);
        let leader_cluster_enabled = AtomicBool::new(config.leader_cluster_enabled);
        let min_isr_check_enabled = AtomicBool::new(config.min_isr_check_enabled);
        Self {
            config,
            concurrency,
            min_isr_cache,
            tick_count: AtomicU64::new(0),
            inter_broker_enabled,
            intra_broker_enabled,
            leader_per_broker_enabled,
            leader_cluster_enabled,
            min_isr_check_enabled,
        }
    }

    /// True once at least one tick has run.
    pub fn is_started(&self) -> bool {
        self.tick_count.load(AtomicOrdering::Relaxed) > 0
    }

    /// Runtime toggle for a single dimension, per
    /// `setConcurrencyAdjusterFor(type, enabled)`.
    pub fn set_enabled(&self, dim: ConcurrencyType, enabled: bool) {
        let flag = match dim {
            ConcurrencyType::InterBrokerReplica => &self.inter_broker_enabled,
            ConcurrencyType::IntraBrokerReplica => &self.intra_broker_enabled,
            ConcurrencyType::LeaderPerBroker => &self.leader_per_broker_enabled,
            ConcurrencyType::LeaderCluster => &self.leader_cluster_enabled,
        };
        flag.store(enabled, AtomicOrdering::Relaxed);
        info!(%dim, enabled, "concurrency adjuster dimension toggled");
    }

    /// Runtime toggle for the periodic min-isr check, per
    /// `setConcurrencyAdjusterMinIsrCheck(enabled)`.
    pub fn set_min_isr_check_enabled(&self, enabled: bool) {
        self.min_isr_check_enabled.store(enabled, AtomicOrdering::Relaxed);
        info!(enabled, "concurrency adjuster min-isr check toggled");
    }

    fn is_enabled(&self, dim: ConcurrencyType) -> bool {
        match dim {
            ConcurrencyType::InterBrokerReplica => self.inter_broker_enabled.load(AtomicOrdering::Relaxed),
            ConcurrencyType::IntraBrokerReplica => self.intra_broker_enabled.load(AtomicOrdering::Relaxed),
            ConcurrencyType::LeaderPerBroker => self.leader_per_broker_enabled.load(AtomicOrdering::Relaxed),
            ConcurrencyType::LeaderCluster => self.leader_cluster_enabled.load(AtomicOrdering::Relaxed),
        }
    }

    fn phase_for(dim: ConcurrencyType) -> Phase {
        match dim {
            ConcurrencyType::InterBrokerReplica => Phase::InterBroker,
            ConcurrencyType::IntraBrokerReplica => Phase::IntraBroker,
            ConcurrencyType::LeaderPerBroker | ConcurrencyType::LeaderCluster => Phase::Leader,
        }
    }

    fn additive_increase(&self, dim: ConcurrencyType, current: u32) -> u32 {
        let bounds = self.concurrency.bounds(dim);
        current.saturating_add(bounds.additive_increase)
    }

    fn multiplicative_decrease(&self, dim: ConcurrencyType, current: u32) -> u32 {
        let bounds = self.concurrency.bounds(dim);
        let factor = bounds.multiplicative_decrease.max(1);
        (current / factor).max(bounds.min)
    }

    /// ISR health for the current tick: Under-MinISR partitions recommend a
    /// stop, else At-MinISR partitions (partitions whose live ISR size has
    /// shrunk to exactly their configured minimum) recommend a per-broker
    /// decrease for every broker sitting in one of those shrunk ISRs.
    async fn isr_reco(
        &self,
        cluster: &ClusterSnapshot,
        now_ms: u64,
        admin: &dyn AdminInterface,
    ) -> Result<IsrReco, crate::types::AdminInterfaceError> {
        let topics: Vec<String> =
            cluster.topics().map(str::to_string).collect::<HashSet<_>>().into_iter().collect();
        let min_isr_by_topic = self.min_isr_cache.get_or_fetch(&topics, now_ms, admin).await?;

        let mut under_min_isr_count = 0u64;
        let mut at_min_isr_brokers = HashSet::new();
        for (tp, state) in &cluster.partitions {
            if !state.exists {
                continue;
            }
            let Some(&min_isr) = min_isr_by_topic.get(&tp.topic) else { continue };
            let live = state.in_sync_replicas.len() as u32;
            if live < min_isr {
                under_min_isr_count += 1;
            } else if live == min_isr {
                at_min_isr_brokers.extend(state.in_sync_replicas.iter().copied());
            }
        }

        if under_min_isr_count >= self.config.stop_execution_under_min_isr_threshold {
            return Ok(IsrReco::Stop { under_min_isr_count });
        }
        if !at_min_isr_brokers.is_empty() {
            return Ok(IsrReco::Decrease(at_min_isr_brokers));
        }
        Ok(IsrReco::NoChange)
    }

    /// Per-broker metric-rule evaluation: a broker whose reported value for
    /// some configured rule's metric crosses that rule's threshold in the
    /// overloaded direction recommends a decrease; every other broker with a
    /// seeded cap recommends an increase.
    async fn metric_reco(
        &self,
        dim: ConcurrencyType,
        load_monitor: &dyn LoadMonitor,
    ) -> Result<Vec<(BrokerId, MetricRecommendation)>, crate::types::LoadMonitorError> {
        let brokers = self.concurrency.brokers_with_cap(dim);
        if brokers.is_empty() || self.config.metric_rules.is_empty() {
            return Ok(brokers.into_iter().map(|b| (b, MetricRecommendation::Increase)).collect());
        }
        let metrics = load_monitor.current_broker_metric_values().await?;
        Ok(brokers
            .into_iter()
            .map(|broker| {
                let overloaded = metrics.values.get(&broker).is_some_and(|values| {
                    self.config.metric_rules.iter().any(|rule| broker_violates(rule, values))
                });
                let reco = if overloaded { MetricRecommendation::Decrease } else { MetricRecommendation::Increase };
                (broker, reco)
            })
            .collect())
    }

    /// Applies `isr_reco` (when it's a per-broker decrease) to `dim`,
    /// returning the set of brokers that were decreased.
    fn apply_isr_decrease(&self, dim: ConcurrencyType, brokers: &HashSet<BrokerId>) {
        for &broker in brokers {
            let Some(current) = self.concurrency.snapshot().broker_cap(dim, broker) else { continue };
            let next = self.multiplicative_decrease(dim, current);
            if next != current {
                info!(%dim, broker, from = current, to = next, "isr-driven decrease");
            }
            self.concurrency.set_for_broker(broker, dim, next);
        }
    }

    /// Applies a metric-based per-broker recommendation to `dim`.
    fn apply_metric_reco(&self, dim: ConcurrencyType, recos: &[(BrokerId, MetricRecommendation)]) {
        for &(broker, reco) in recos {
            let Some(current) = self.concurrency.snapshot().broker_cap(dim, broker) else { continue };
            let next = match reco {
                MetricRecommendation::Increase => self.additive_increase(dim, current),
                MetricRecommendation::Decrease => self.multiplicative_decrease(dim, current),
            };
            if next != current {
                debug!(%dim, broker, from = current, to = next, ?reco, "metric-driven adjustment");
            }
            self.concurrency.set_for_broker(broker, dim, next);
        }
    }

    fn publish_summary(&self, dim: ConcurrencyType) {
        let updated = self.concurrency.get_execution_concurrency_summary(dim);
        crate::metrics::set_concurrency_cap_summary(dimension_label(dim), updated.min, updated.max, updated.avg);
    }

    /// Evaluates and applies one dimension's recommendation for this tick,
    /// returning the aggregate direction actually applied (if any), for the
    /// `LeaderCluster` piggyback to consult.
    async fn adjust_dimension(
        &self,
        dim: ConcurrencyType,
        phase: Phase,
        is_metric_check_tick: bool,
        cluster: &ClusterSnapshot,
        now_ms: u64,
        load_monitor: &dyn LoadMonitor,
        admin: &dyn AdminInterface,
    ) -> Result<(Option<IsrReco>, Option<AdjustDirection>), crate::types::ExecutorError> {
        if !self.is_enabled(dim) || Self::phase_for(dim) != phase {
            return Ok((None, None));
        }

        let isr_reco = self.isr_reco(cluster, now_ms, admin).await?;
        if let IsrReco::Stop { .. } = isr_reco {
            return Ok((Some(isr_reco), None));
        }
        if let IsrReco::Decrease(ref brokers) = isr_reco {
            self.apply_isr_decrease(dim, brokers);
            self.publish_summary(dim);
            return Ok((Some(isr_reco), Some(AdjustDirection::Decrease)));
        }

        if !is_metric_check_tick {
            return Ok((Some(isr_reco), None));
        }
        let recos = self.metric_reco(dim, load_monitor).await?;
        let direction = if recos.iter().any(|(_, r)| *r == MetricRecommendation::Decrease) {
            Some(AdjustDirection::Decrease)
        } else if recos.iter().any(|(_, r)| *r == MetricRecommendation::Increase) {
            Some(AdjustDirection::Increase)
        } else {
            None
        };
        self.apply_metric_reco(dim, &recos);
        self.publish_summary(dim);
        Ok((Some(isr_reco), direction))
    }

    /// Runs one adjustment tick over `InterBrokerReplica` and
    /// `LeaderPerBroker`, phase-gated against `phase`. `LeaderCluster`
    /// piggybacks on `LeaderPerBroker`'s outcome when both are enabled and
    /// `phase == Phase::Leader`.
    #[instrument(skip_all)]
    pub async fn tick(
        &self,
        now_ms: u64,
        phase: Phase,
        cluster: &ClusterSnapshot,
        load_monitor: &dyn LoadMonitor,
        admin: &dyn AdminInterface,
    ) -> Result<AdjusterRecommendation, crate::types::ExecutorError> {
        let tick = self.tick_count.fetch_add(1, AtomicOrdering::Relaxed);
        let is_metric_check_tick =
            self.min_isr_check_enabled.load(AtomicOrdering::Relaxed) && tick % u64::from(self.config.num_min_isr_check) == 0;

        let (inter_isr, _) = self
            .adjust_dimension(
                ConcurrencyType::InterBrokerReplica,
                phase,
                is_metric_check_tick,
                cluster,
                now_ms,
                load_monitor,
                admin,
            )
            .await?;
        if let Some(IsrReco::Stop { under_min_isr_count }) = inter_isr {
            warn!(under_min_isr_count, "cluster under min-isr, recommending stop");
            return Ok(AdjusterRecommendation::StopExecution { under_min_isr_count });
        }

        let (leader_isr, leader_direction) = self
            .adjust_dimension(
                ConcurrencyType::LeaderPerBroker,
                phase,
                is_metric_check_tick,
                cluster,
                now_ms,
                load_monitor,
                admin,
            )
            .await?;
        if let Some(IsrReco::Stop { under_min_isr_count }) = leader_isr {
            warn!(under_min_isr_count, "cluster under min-isr, recommending stop");
            return Ok(AdjusterRecommendation::StopExecution { under_min_isr_count });
        }

        if phase == Phase::Leader && self.leader_cluster_enabled.load(AtomicOrdering::Relaxed) {
            if let Some(direction) = leader_direction {
                let current = self.concurrency.snapshot().cluster_cap(ConcurrencyType::LeaderCluster).unwrap_or(0);
                let next = match direction {
                    AdjustDirection::Increase => self.additive_increase(ConcurrencyType::LeaderCluster, current),
                    AdjustDirection::Decrease => self.multiplicative_decrease(ConcurrencyType::LeaderCluster, current),
                };
                if next != current {
                    info!(from = current, to = next, ?direction, "leader cluster cap piggybacked on per-broker outcome");
                }
                self.concurrency.set_for_all_brokers_or_cluster(ConcurrencyType::LeaderCluster, next);
                self.publish_summary(ConcurrencyType::LeaderCluster);
            }
        }

        debug!(tick, "concurrency adjuster tick complete");
        Ok(AdjusterRecommendation::Continue)
    }
}

fn broker_violates(rule: &MetricRule, values: &std::collections::HashMap<String, f64>) -> bool {
    let Some(&value) = values.get(&rule.metric) else { return false };
    match rule.direction {
        MetricDirection::Above => value > rule.threshold,
        MetricDirection::Below => value < rule.threshold,
    }
}

fn dimension_label(dim: ConcurrencyType) -> &'static str {
    match dim {
        ConcurrencyType::InterBrokerReplica => "inter_broker_replica",
        ConcurrencyType::IntraBrokerReplica => "intra_broker_replica",
        ConcurrencyType::LeaderPerBroker => "leader_per_broker",
        ConcurrencyType::LeaderCluster => "leader_cluster",
    }
}

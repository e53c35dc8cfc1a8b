use std::collections::HashMap;

use super::*;
use crate::config::{ConcurrencyDimensionBounds, ConcurrencyTypeKey, DimensionBound};

fn bounds() -> ConcurrencyDimensionBounds {
    let mut bounds = HashMap::new();
    bounds.insert(
        ConcurrencyTypeKey::InterBrokerReplica,
        DimensionBound { min: 1, max: 8, additive_increase: 1, multiplicative_decrease: 2 },
    );
    bounds.insert(
        ConcurrencyTypeKey::IntraBrokerReplica,
        DimensionBound { min: 1, max: 8, additive_increase: 1, multiplicative_decrease: 2 },
    );
    bounds.insert(
        ConcurrencyTypeKey::LeaderPerBroker,
        DimensionBound { min: 1, max: 8, additive_increase: 1, multiplicative_decrease: 2 },
    );
    bounds.insert(
        ConcurrencyTypeKey::LeaderCluster,
        DimensionBound { min: 1, max: 100, additive_increase: 5, multiplicative_decrease: 2 },
    );
    ConcurrencyDimensionBounds { bounds }
}

#[test]
fn initialize_seeds_requested_caps_clamped_to_bounds() {
    let mgr = ConcurrencyManager::new(bounds());
    let mut requested = HashMap::new();
    requested.insert(ConcurrencyType::InterBrokerReplica, 100); // above MAX=8
    mgr.initialize(&[1, 2, 3], &requested);
    let snap = mgr.snapshot();
    assert_eq!(snap.broker_cap(ConcurrencyType::InterBrokerReplica, 1), Some(8));
    assert_eq!(snap.broker_cap(ConcurrencyType::InterBrokerReplica, 2), Some(8));
}

#[test]
fn set_for_broker_is_clamped() {
    let mgr = ConcurrencyManager::new(bounds());
    mgr.initialize(&[1], &HashMap::new());
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 0);
    assert_eq!(mgr.snapshot().broker_cap(ConcurrencyType::InterBrokerReplica, 1), Some(1));
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 999);
    assert_eq!(mgr.snapshot().broker_cap(ConcurrencyType::InterBrokerReplica, 1), Some(8));
}

#[test]
fn increase_at_max_is_a_no_op() {
    let mgr = ConcurrencyManager::new(bounds());
    mgr.initialize(&[1], &HashMap::new());
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 8);
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 9);
    assert_eq!(mgr.snapshot().broker_cap(ConcurrencyType::InterBrokerReplica, 1), Some(8));
}

#[test]
fn decrease_at_min_is_a_no_op() {
    let mgr = ConcurrencyManager::new(bounds());
    mgr.initialize(&[1], &HashMap::new());
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 1);
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 0);
    assert_eq!(mgr.snapshot().broker_cap(ConcurrencyType::InterBrokerReplica, 1), Some(1));
}

#[test]
fn set_for_all_brokers_or_cluster_updates_every_broker_and_cluster_cap() {
    let mgr = ConcurrencyManager::new(bounds());
    mgr.initialize(&[1, 2, 3], &HashMap::new());
    mgr.set_for_all_brokers_or_cluster(ConcurrencyType::InterBrokerReplica, 3);
    let snap = mgr.snapshot();
    for broker in [1, 2, 3] {
        assert_eq!(snap.broker_cap(ConcurrencyType::InterBrokerReplica, broker), Some(3));
    }
    assert_eq!(snap.cluster_cap(ConcurrencyType::InterBrokerReplica), Some(3));
}

#[test]
fn brokers_with_cap_lists_only_seeded_brokers_for_that_dimension() {
    let mgr = ConcurrencyManager::new(bounds());
    mgr.initialize(&[1, 2, 3], &HashMap::new());
    let mut brokers = mgr.brokers_with_cap(ConcurrencyType::InterBrokerReplica);
    brokers.sort();
    assert_eq!(brokers, vec![1, 2, 3]);
    assert!(mgr.brokers_with_cap(ConcurrencyType::LeaderCluster).is_empty(), "leader cluster has no per-broker table");
}

#[test]
fn concurrency_summary_reports_min_max_avg() {
    let mgr = ConcurrencyManager::new(bounds());
    mgr.initialize(&[1, 2], &HashMap::new());
    mgr.set_for_broker(1, ConcurrencyType::InterBrokerReplica, 2);
    mgr.set_for_broker(2, ConcurrencyType::InterBrokerReplica, 8);
    let summary = mgr.get_execution_concurrency_summary(ConcurrencyType::InterBrokerReplica);
    assert_eq!(summary.min, 2);
    assert_eq!(summary.max, 8);
    assert_eq!(summary.avg, 5.0);
}

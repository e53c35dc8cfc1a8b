//! Shared builders for the execution core's unit tests: minimal
//! `ExecutionProposal`/`ClusterSnapshot` constructors and default-behavior
//! mock collaborators, so individual `*_test.rs` modules don't each
//! reinvent them.

use std::collections::HashMap;

use crate::config::{ConcurrencyDimensionBounds, ConcurrencyTypeKey, DimensionBound};
use crate::types::{
    BrokerId,
    BrokerNode,
    ClusterSnapshot,
    DiskMove,
    ExecutionProposal,
    MockAdminInterface,
    MockLoadMonitor,
    MockMetadataClient,
    PartitionState,
    ReassignmentOutcome,
    TopicPartition,
};

/// An inter-broker-replica-move proposal for `topic`-`partition`.
pub fn replica_move_proposal(
    topic: &str,
    partition: i32,
    old_replicas: Vec<BrokerId>,
    new_replicas: Vec<BrokerId>,
) -> ExecutionProposal {
    ExecutionProposal {
        topic_partition: TopicPartition { topic: topic.to_string(), partition },
        old_replicas,
        new_replicas,
        old_leader: None,
        new_leader: None,
        disk_moves_by_broker: HashMap::new(),
        data_size_bytes: 0,
    }
}

/// A leader-only proposal: replicas unchanged, preferred leader moves from
/// `old_leader` to `new_leader`.
pub fn leader_move_proposal(
    topic: &str,
    partition: i32,
    replicas: Vec<BrokerId>,
    old_leader: BrokerId,
    new_leader: BrokerId,
) -> ExecutionProposal {
    ExecutionProposal {
        topic_partition: TopicPartition { topic: topic.to_string(), partition },
        old_replicas: replicas.clone(),
        new_replicas: replicas,
        old_leader: Some(old_leader),
        new_leader: Some(new_leader),
        disk_moves_by_broker: HashMap::new(),
        data_size_bytes: 0,
    }
}

/// A proposal that only moves a replica between disks on the same broker.
pub fn intra_broker_move_proposal(
    topic: &str,
    partition: i32,
    broker: BrokerId,
    old_log_dir: &str,
    new_log_dir: &str,
) -> ExecutionProposal {
    let mut disk_moves_by_broker = HashMap::new();
    disk_moves_by_broker
        .insert(broker, DiskMove { old_log_dir: old_log_dir.to_string(), new_log_dir: new_log_dir.to_string() });
    ExecutionProposal {
        topic_partition: TopicPartition { topic: topic.to_string(), partition },
        old_replicas: vec![broker],
        new_replicas: vec![broker],
        old_leader: None,
        new_leader: None,
        disk_moves_by_broker,
        data_size_bytes: 0,
    }
}

/// Uniform `[1, max]` bounds for every concurrency dimension, with
/// additive-increase 1 and multiplicative-decrease 2.
pub fn uniform_bounds(max: u32) -> ConcurrencyDimensionBounds {
    let mut bounds = HashMap::new();
    for key in [
        ConcurrencyTypeKey::InterBrokerReplica,
        ConcurrencyTypeKey::IntraBrokerReplica,
        ConcurrencyTypeKey::LeaderPerBroker,
        ConcurrencyTypeKey::LeaderCluster,
    ] {
        bounds.insert(key, DimensionBound { min: 1, max, additive_increase: 1, multiplicative_decrease: 2 });
    }
    ConcurrencyDimensionBounds { bounds }
}

/// A cluster snapshot with the given brokers (all alive) and no partitions.
pub fn cluster_with_brokers(brokers: &[BrokerId]) -> ClusterSnapshot {
    ClusterSnapshot {
        brokers: brokers.iter().map(|&id| (id, BrokerNode { id, alive: true })).collect(),
        partitions: HashMap::new(),
    }
}

/// A cluster snapshot with one partition, fully in sync, led by its first
/// replica.
pub fn cluster_with_partition(brokers: &[BrokerId], tp: TopicPartition, replicas: Vec<BrokerId>) -> ClusterSnapshot {
    let mut cluster = cluster_with_brokers(brokers);
    let leader = replicas.first().copied();
    cluster.partitions.insert(
        tp,
        PartitionState { in_sync_replicas: replicas.clone(), replicas, leader, exists: true },
    );
    cluster
}

/// An [`MockAdminInterface`] that accepts every submission and reports
/// nothing in flight; suitable for tests that only need the happy path.
pub fn accepting_admin() -> MockAdminInterface {
    let mut admin = MockAdminInterface::new();
    admin.expect_alter_partition_reassignments().returning(|submissions| {
        Ok(submissions.into_iter().map(|s| (s.topic_partition, ReassignmentOutcome::Accepted)).collect())
    });
    admin.expect_list_partition_reassignments().returning(|| Ok(HashMap::new()));
    admin.expect_elect_preferred_leaders().returning(|partitions| {
        Ok(partitions.into_iter().map(|tp| (tp, ReassignmentOutcome::Accepted)).collect())
    });
    admin.expect_describe_replica_log_dirs().returning(|_| Ok(HashMap::new()));
    admin.expect_set_replication_throttle().returning(|_, _| Ok(()));
    admin.expect_describe_configs().returning(|_| Ok(HashMap::new()));
    admin
}

/// A [`MockMetadataClient`] that always returns `snapshot` on both
/// `refresh` and `cluster`.
pub fn metadata_with(snapshot: ClusterSnapshot) -> MockMetadataClient {
    let mut metadata = MockMetadataClient::new();
    let for_refresh = snapshot.clone();
    metadata.expect_refresh().returning(move || Ok(for_refresh.clone()));
    metadata.expect_cluster().returning(move || snapshot.clone());
    metadata
}

/// A [`MockLoadMonitor`] reporting `brokers` as healthy and replica-bearing.
pub fn load_monitor_with(brokers: Vec<BrokerId>) -> MockLoadMonitor {
    let mut load_monitor = MockLoadMonitor::new();
    load_monitor.expect_brokers_with_replicas().returning(move |_| Ok(brokers.clone()));
    load_monitor
}

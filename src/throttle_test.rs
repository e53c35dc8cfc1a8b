use super::*;
use crate::types::{ExecutionProposal, MockAdminInterface, TaskType, TopicPartition};

fn task(id: u64, old: Vec<BrokerId>, new: Vec<BrokerId>) -> ExecutionTask {
    let proposal = ExecutionProposal {
        topic_partition: TopicPartition { topic: "t".to_string(), partition: id as i32 },
        old_replicas: old,
        new_replicas: new,
        old_leader: None,
        new_leader: None,
        disk_moves_by_broker: std::collections::HashMap::new(),
        data_size_bytes: 0,
    };
    ExecutionTask::new(id, TaskType::InterBrokerReplica, proposal, None)
}

#[tokio::test]
async fn reconcile_throttles_newly_seen_brokers() {
    let helper = ThrottleHelper::new(1_000_000);
    let mut admin = MockAdminInterface::new();
    admin
        .expect_set_replication_throttle()
        .withf(|brokers, rate| {
            let mut sorted = brokers.clone();
            sorted.sort();
            sorted == vec![1, 2, 3] && *rate == Some(1_000_000)
        })
        .returning(|_, _| Ok(()));

    let t = task(0, vec![1, 2], vec![1, 3]);
    helper.reconcile(&[&t], &admin).await.unwrap();
}

#[tokio::test]
async fn reconcile_clears_brokers_no_longer_participating() {
    let helper = ThrottleHelper::new(1_000_000);
    let mut admin = MockAdminInterface::new();
    admin.expect_set_replication_throttle().times(1).returning(|_, _| Ok(()));
    let t = task(0, vec![1, 2], vec![1, 3]);
    helper.reconcile(&[&t], &admin).await.unwrap();

    let mut admin2 = MockAdminInterface::new();
    admin2
        .expect_set_replication_throttle()
        .withf(|brokers, rate| brokers == &vec![4] && *rate == Some(1_000_000))
        .returning(|_, _| Ok(()));
    admin2
        .expect_set_replication_throttle()
        .withf(|brokers, rate| {
            let mut sorted = brokers.clone();
            sorted.sort();
            sorted == vec![2, 3] && rate.is_none()
        })
        .returning(|_, _| Ok(()));

    let t2 = task(1, vec![1, 4], vec![1]);
    helper.reconcile(&[&t2], &admin2).await.unwrap();
}

#[tokio::test]
async fn reconcile_is_a_no_op_when_nothing_changed() {
    let helper = ThrottleHelper::new(1_000_000);
    let mut admin = MockAdminInterface::new();
    admin.expect_set_replication_throttle().times(1).returning(|_, _| Ok(()));
    let t = task(0, vec![1, 2], vec![1, 3]);
    helper.reconcile(&[&t], &admin).await.unwrap();

    let admin2 = MockAdminInterface::new(); // no expectations set: any call panics
    helper.reconcile(&[&t], &admin2).await.unwrap();
}

#[tokio::test]
async fn clear_all_clears_every_throttled_broker() {
    let helper = ThrottleHelper::new(1_000_000);
    let mut admin = MockAdminInterface::new();
    admin.expect_set_replication_throttle().times(1).returning(|_, _| Ok(()));
    let t = task(0, vec![1, 2], vec![1, 3]);
    helper.reconcile(&[&t], &admin).await.unwrap();

    let mut admin2 = MockAdminInterface::new();
    admin2
        .expect_set_replication_throttle()
        .withf(|_, rate| rate.is_none())
        .returning(|_, _| Ok(()));
    helper.clear_all(&admin2).await.unwrap();
}

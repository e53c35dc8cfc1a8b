use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::*;
use crate::types::{
    ClusterSnapshot,
    MockAdminInterface,
    MockAnomalyDetectorManager,
    MockExecutorNotifier,
    MockLoadMonitor,
    MockMetadataClient,
    MockUserTaskManager,
    ReassignmentOutcome,
    SamplingMode,
};

struct TestClock(AtomicU64);

impl std::fmt::Debug for TestClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClock").finish()
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

fn noop_collaborators() -> ExecutorCollaborators {
    let mut admin = MockAdminInterface::new();
    admin.expect_alter_partition_reassignments().returning(|submissions| {
        Ok(submissions.into_iter().map(|s| (s.topic_partition, ReassignmentOutcome::Accepted)).collect())
    });
    admin.expect_list_partition_reassignments().returning(|| Ok(HashMap::new()));
    admin.expect_elect_preferred_leaders().returning(|_| Ok(HashMap::new()));
    admin.expect_describe_replica_log_dirs().returning(|_| Ok(HashMap::new()));
    admin.expect_set_replication_throttle().returning(|_, _| Ok(()));
    admin.expect_describe_configs().returning(|_| Ok(HashMap::new()));

    let mut metadata = MockMetadataClient::new();
    metadata.expect_refresh().returning(|| Ok(ClusterSnapshot::default()));
    metadata.expect_cluster().returning(ClusterSnapshot::default);

    let mut load_monitor = MockLoadMonitor::new();
    load_monitor.expect_brokers_with_replicas().returning(|_| Ok(Vec::new()));
    load_monitor.expect_sampling_mode().returning(|| SamplingMode::All);

    let mut user_task_manager = MockUserTaskManager::new();
    user_task_manager.expect_mark_task_execution_began().returning(|_| ());
    user_task_manager.expect_mark_task_execution_finished().returning(|_, _| ());

    let mut anomaly = MockAnomalyDetectorManager::new();
    anomaly.expect_mark_self_healing_finished().returning(|_, _| ());

    let mut notifier = MockExecutorNotifier::new();
    notifier.expect_send_notification().returning(|_| ());

    ExecutorCollaborators {
        admin: Arc::new(admin),
        metadata: Arc::new(metadata),
        load_monitor: Arc::new(load_monitor),
        user_task_manager: Arc::new(user_task_manager),
        anomaly_detector_manager: Arc::new(anomaly),
        notifier: Arc::new(notifier),
    }
}

#[tokio::test]
async fn execute_proposals_runs_to_completion_with_no_proposals() {
    let executor = Executor::with_clock(ExecutorConfig::default(), noop_collaborators(), Arc::new(TestClock(AtomicU64::new(0))));
    executor.execute_proposals(Vec::new(), Default::default(), HashMap::new(), true, "test".to_string()).await.unwrap();

    for _ in 0..50 {
        if !executor.is_executing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!executor.is_executing());
}

#[tokio::test]
async fn a_second_execute_proposals_call_fails_while_one_is_ongoing() {
    let mut admin = MockAdminInterface::new();
    admin.expect_alter_partition_reassignments().returning(|_| Ok(HashMap::new()));
    admin.expect_list_partition_reassignments().returning(|| Ok(HashMap::new()));
    admin.expect_set_replication_throttle().returning(|_, _| Ok(()));
    let mut metadata = MockMetadataClient::new();
    metadata.expect_refresh().returning(|| Ok(ClusterSnapshot::default()));
    let mut load_monitor = MockLoadMonitor::new();
    load_monitor.expect_brokers_with_replicas().returning(|_| Ok(Vec::new()));
    let mut user_task_manager = MockUserTaskManager::new();
    user_task_manager.expect_mark_task_execution_began().returning(|_| ());

    let collaborators = ExecutorCollaborators {
        admin: Arc::new(admin),
        metadata: Arc::new(metadata),
        load_monitor: Arc::new(load_monitor),
        user_task_manager: Arc::new(user_task_manager),
        anomaly_detector_manager: Arc::new(MockAnomalyDetectorManager::new()),
        notifier: Arc::new(MockExecutorNotifier::new()),
    };
    let executor = Executor::with_clock(
        ExecutorConfig { execution_progress_check_interval_ms: 10_000, ..ExecutorConfig::default() },
        collaborators,
        Arc::new(TestClock(AtomicU64::new(0))),
    );

    let proposal = crate::types::ExecutionProposal {
        topic_partition: crate::types::TopicPartition { topic: "t".to_string(), partition: 0 },
        old_replicas: vec![1, 2],
        new_replicas: vec![1, 3],
        old_leader: None,
        new_leader: None,
        disk_moves_by_broker: HashMap::new(),
        data_size_bytes: 0,
    };
    executor.execute_proposals(vec![proposal], Default::default(), HashMap::new(), true, "first".to_string()).await.unwrap();

    let err = executor.execute_proposals(Vec::new(), Default::default(), HashMap::new(), true, "second".to_string()).await;
    assert!(matches!(err, Err(ExecutorError::OngoingExecution)));
}

#[tokio::test]
async fn user_trigger_stop_without_an_ongoing_execution_is_an_illegal_state() {
    let executor = Executor::with_clock(ExecutorConfig::default(), noop_collaborators(), Arc::new(TestClock(AtomicU64::new(0))));
    let err = executor.user_trigger_stop("stop".to_string(), false).await;
    assert!(matches!(err, Err(ExecutorError::IllegalState(_))));
}

#[tokio::test]
async fn user_trigger_stop_with_external_agent_and_no_local_execution_cancels_it() {
    let mut admin = MockAdminInterface::new();
    let in_flight = crate::types::TopicPartition { topic: "t".to_string(), partition: 0 };
    let for_list = in_flight.clone();
    admin.expect_list_partition_reassignments().returning(move || Ok(HashMap::from([(for_list.clone(), vec![1, 2])])));
    admin.expect_cancel_partition_reassignments().withf(move |ps| ps == &vec![in_flight.clone()]).returning(|ps| {
        Ok(ps.into_iter().map(|tp| (tp, ReassignmentOutcome::Accepted)).collect())
    });

    let collaborators = ExecutorCollaborators {
        admin: Arc::new(admin),
        metadata: Arc::new(MockMetadataClient::new()),
        load_monitor: Arc::new(MockLoadMonitor::new()),
        user_task_manager: Arc::new(MockUserTaskManager::new()),
        anomaly_detector_manager: Arc::new(MockAnomalyDetectorManager::new()),
        notifier: Arc::new(MockExecutorNotifier::new()),
    };
    let executor =
        Executor::with_clock(ExecutorConfig::default(), collaborators, Arc::new(TestClock(AtomicU64::new(0))));

    executor.user_trigger_stop("stop".to_string(), true).await.unwrap();
}

#[tokio::test]
async fn shutdown_prevents_further_executions() {
    let executor = Executor::with_clock(ExecutorConfig::default(), noop_collaborators(), Arc::new(TestClock(AtomicU64::new(0))));
    executor.shutdown().await.unwrap();

    let err = executor.execute_proposals(Vec::new(), Default::default(), HashMap::new(), true, "late".to_string()).await;
    assert!(matches!(err, Err(ExecutorError::IllegalState(_))));
}

#[tokio::test]
async fn execute_proposals_fails_when_an_external_agent_is_active() {
    let mut admin = MockAdminInterface::new();
    admin
        .expect_list_partition_reassignments()
        .returning(|| Ok(HashMap::from([(crate::types::TopicPartition { topic: "t".to_string(), partition: 0 }, vec![1, 2])])));

    let collaborators = ExecutorCollaborators {
        admin: Arc::new(admin),
        metadata: Arc::new(MockMetadataClient::new()),
        load_monitor: Arc::new(MockLoadMonitor::new()),
        user_task_manager: Arc::new(MockUserTaskManager::new()),
        anomaly_detector_manager: Arc::new(MockAnomalyDetectorManager::new()),
        notifier: Arc::new(MockExecutorNotifier::new()),
    };
    let executor =
        Executor::with_clock(ExecutorConfig::default(), collaborators, Arc::new(TestClock(AtomicU64::new(0))));

    let err = executor.execute_proposals(Vec::new(), Default::default(), HashMap::new(), true, "reason".to_string()).await;
    assert!(matches!(err, Err(ExecutorError::IllegalState(_))));
    assert!(executor.state().is_no_task(), "state must revert to NoTask after a failed sanity check");
}

#[tokio::test]
async fn observers_reflect_initial_and_post_execution_state() {
    let mut admin = MockAdminInterface::new();
    admin.expect_list_partition_reassignments().returning(|| Ok(HashMap::new()));
    admin.expect_set_replication_throttle().returning(|_, _| Ok(()));

    let mut metadata = MockMetadataClient::new();
    metadata.expect_refresh().returning(|| {
        Ok(ClusterSnapshot { brokers: HashMap::from([(1, crate::types::BrokerNode { id: 1, alive: true })]), partitions: HashMap::new() })
    });
    metadata.expect_cluster().returning(|| {
        ClusterSnapshot { brokers: HashMap::from([(1, crate::types::BrokerNode { id: 1, alive: true })]), partitions: HashMap::new() }
    });

    let mut load_monitor = MockLoadMonitor::new();
    load_monitor.expect_brokers_with_replicas().returning(|_| Ok(vec![1]));

    let mut user_task_manager = MockUserTaskManager::new();
    user_task_manager.expect_mark_task_execution_began().returning(|_| ());
    user_task_manager.expect_mark_task_execution_finished().returning(|_, _| ());

    let mut anomaly = MockAnomalyDetectorManager::new();
    anomaly.expect_mark_self_healing_finished().returning(|_, _| ());

    let mut notifier = MockExecutorNotifier::new();
    notifier.expect_send_notification().returning(|_| ());

    let collaborators = ExecutorCollaborators {
        admin: Arc::new(admin),
        metadata: Arc::new(metadata),
        load_monitor: Arc::new(load_monitor),
        user_task_manager: Arc::new(user_task_manager),
        anomaly_detector_manager: Arc::new(anomaly),
        notifier: Arc::new(notifier),
    };
    let executor = Executor::with_clock(ExecutorConfig::default(), collaborators, Arc::new(TestClock(AtomicU64::new(0))));
    assert!(!executor.has_ongoing_execution());
    assert!(!executor.is_concurrency_manager_initialized());
    assert!(!executor.is_concurrency_adjuster_started());

    executor.execute_proposals(Vec::new(), Default::default(), HashMap::new(), true, "test".to_string()).await.unwrap();
    for _ in 0..50 {
        if !executor.is_executing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(executor.is_concurrency_manager_initialized());
    assert!(executor.is_concurrency_adjuster_started());
}

#[tokio::test]
async fn state_is_no_task_before_any_execution() {
    let executor = Executor::with_clock(ExecutorConfig::default(), noop_collaborators(), Arc::new(TestClock(AtomicU64::new(0))));
    assert!(executor.state().is_no_task());
    assert!(!executor.is_executing());
}

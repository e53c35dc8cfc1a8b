//! Data model and collaborator contracts for the execution core.
//!
//! [`ExecutionTask`] is the immutable-plus-state unit of work; the
//! collaborator traits (`AdminInterface`, `MetadataClient`, `LoadMonitor`,
//! `UserTaskManager`, `AnomalyDetectorManager`, `ExecutorNotifier`) are the
//! node-side APIs this component calls out to. Function calls on these
//! traits should be assumed to not be cancel safe.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A broker in the cluster.
pub type BrokerId = i32;

/// Identifies a partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single broker-local disk move: the replica currently lives in
/// `old_log_dir` and should end up in `new_log_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskMove {
    pub old_log_dir: String,
    pub new_log_dir: String,
}

/// One proposed change to a partition: a replica-set change, a set of
/// per-broker disk moves, and/or a preferred-leader change. A proposal may
/// request any non-empty subset of these three changes at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProposal {
    pub topic_partition: TopicPartition,
    pub old_replicas: Vec<BrokerId>,
    pub new_replicas: Vec<BrokerId>,
    pub old_leader: Option<BrokerId>,
    pub new_leader: Option<BrokerId>,
    pub disk_moves_by_broker: HashMap<BrokerId, DiskMove>,
    /// Bytes of replica data this proposal's inter-broker/intra-broker move
    /// would shift; 0 for a leader-only proposal. Feeds the tracker's
    /// per-data-size counters alongside its per-type counters.
    pub data_size_bytes: u64,
}

impl ExecutionProposal {
    /// True if the replica set membership changes (order-independent).
    pub fn requires_inter_broker_move(&self) -> bool {
        let mut old_sorted = self.old_replicas.clone();
        let mut new_sorted = self.new_replicas.clone();
        old_sorted.sort_unstable();
        new_sorted.sort_unstable();
        old_sorted != new_sorted
    }

    /// True if the preferred leader changes.
    pub fn requires_leader_move(&self) -> bool {
        self.old_leader != self.new_leader && self.new_leader.is_some()
    }
}

/// The three kinds of movement an [`ExecutionTask`] can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum TaskType {
    InterBrokerReplica,
    IntraBrokerReplica,
    Leader,
}

/// Task lifecycle state. Transitions form a DAG:
/// `Pending -> InProgress -> {Completed | Aborting -> {Completed, Aborted, Dead} | Dead}`.
/// `Aborting -> Completed` is the "done because deleted" path: a topic
/// deleted mid-flight finishes the task successfully rather than failing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InProgress,
    Aborting,
    Aborted,
    Dead,
    Completed,
}

impl TaskState {
    /// Terminal states never transition further; `end_time_ms` is set iff terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Aborted | TaskState::Dead | TaskState::Completed)
    }

    fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Aborting)
                | (InProgress, Dead)
                | (Aborting, Completed)
                | (Aborting, Aborted)
                | (Aborting, Dead)
        )
    }
}

/// One unit of work the execution loop drives to completion.
#[derive(Debug, Clone)]
pub struct ExecutionTask {
    pub id: u64,
    pub task_type: TaskType,
    pub proposal: ExecutionProposal,
    state: TaskState,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    /// Set for intra-broker tasks: the broker on which the disk move happens.
    pub broker_id: Option<BrokerId>,
}

impl ExecutionTask {
    pub fn new(
        id: u64,
        task_type: TaskType,
        proposal: ExecutionProposal,
        broker_id: Option<BrokerId>,
    ) -> Self {
        Self {
            id,
            task_type,
            proposal,
            state: TaskState::Pending,
            start_time_ms: None,
            end_time_ms: None,
            broker_id,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// All brokers this task touches, for concurrency accounting.
    pub fn affected_brokers(&self) -> Vec<BrokerId> {
        match self.task_type {
            TaskType::InterBrokerReplica => {
                let mut brokers = self.proposal.old_replicas.clone();
                brokers.extend(self.proposal.new_replicas.iter().copied());
                brokers.sort_unstable();
                brokers.dedup();
                brokers
            }
            TaskType::IntraBrokerReplica => self.broker_id.into_iter().collect(),
            TaskType::Leader => self.proposal.new_leader.into_iter().collect(),
        }
    }

    fn transition(&mut self, next: TaskState, now_ms: u64) {
        assert!(
            self.state.can_transition_to(next),
            "illegal task state transition for task {}: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        if next.is_terminal() {
            self.end_time_ms = Some(now_ms);
        }
        self.state = next;
    }

    pub fn mark_in_progress(&mut self, now_ms: u64) {
        self.start_time_ms = Some(now_ms);
        self.transition(TaskState::InProgress, now_ms);
    }

    pub fn mark_completed(&mut self, now_ms: u64) {
        self.transition(TaskState::Completed, now_ms);
    }

    pub fn mark_aborting(&mut self, now_ms: u64) {
        self.transition(TaskState::Aborting, now_ms);
    }

    pub fn mark_aborted(&mut self, now_ms: u64) {
        self.transition(TaskState::Aborted, now_ms);
    }

    pub fn mark_dead(&mut self, now_ms: u64) {
        self.transition(TaskState::Dead, now_ms);
    }
}

/// One of the four concurrency dimensions the concurrency manager caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ConcurrencyType {
    InterBrokerReplica,
    IntraBrokerReplica,
    LeaderPerBroker,
    LeaderCluster,
}

/// Errors surfaced to callers of the executor's public API.
///
/// See spec §7: `OngoingExecution` and `IllegalState` are returned directly
/// to the caller without mutating state (beyond resetting to `NoTask` for
/// `IllegalState`, as documented on the call sites that can raise it);
/// `AdminTransient` is logged and retried by the progress-check loop, never
/// propagated to the executor's public callers; `Interrupted` propagates out
/// of blocking waits.
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    /// A user action (start, stop) was attempted against a precondition that
    /// does not hold (e.g. start while already running).
    #[error("an execution is already ongoing")]
    OngoingExecution,
    /// An internal invariant was violated (uuid mismatch, unexpected
    /// executor state, admin interface returned an illegal result).
    #[error("illegal executor state: {0}")]
    IllegalState(String),
    /// A transient failure talking to the admin interface or metadata
    /// client during the progress-check loop.
    #[error("transient admin-interface error: {0}")]
    AdminTransient(String),
    /// Propagated out of a blocking wait; treated as a stop where possible.
    #[error("interrupted")]
    Interrupted,
}

impl From<AdminInterfaceError> for ExecutorError {
    fn from(err: AdminInterfaceError) -> Self {
        ExecutorError::AdminTransient(err.to_string())
    }
}

impl From<LoadMonitorError> for ExecutorError {
    fn from(err: LoadMonitorError) -> Self {
        ExecutorError::AdminTransient(err.to_string())
    }
}

/// Errors reported by the [`AdminInterface`] collaborator.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AdminInterfaceError {
    #[error("timed out waiting for admin interface response")]
    Timeout,
    #[error("admin interface call interrupted")]
    Interrupted,
    #[error("admin interface error: {0}")]
    Remote(String),
}

/// Errors reported by the [`LoadMonitor`] collaborator.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LoadMonitorError {
    #[error("load monitor timed out after {0}ms")]
    Timeout(u64),
    #[error("load monitor error: {0}")]
    Remote(String),
}

/// Outcome of submitting one partition's reassignment to the admin interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignmentOutcome {
    Accepted,
    DeletedTopic,
    BrokerUnavailable,
    /// Requesting cancellation of a reassignment that does not exist.
    /// Legal only while rolling back; illegal during normal submission.
    NoReassignmentToCancel,
}

/// A single broker as reported by cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerNode {
    pub id: BrokerId,
    pub alive: bool,
}

/// The on-disk location and leader of one partition, as reported by cluster
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionState {
    pub replicas: Vec<BrokerId>,
    pub leader: Option<BrokerId>,
    pub in_sync_replicas: Vec<BrokerId>,
    /// False if the topic has been deleted.
    pub exists: bool,
}

/// A point-in-time view of the cluster, as returned by [`MetadataClient`].
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub brokers: HashMap<BrokerId, BrokerNode>,
    pub partitions: HashMap<TopicPartition, PartitionState>,
}

impl ClusterSnapshot {
    pub fn broker(&self, id: BrokerId) -> Option<&BrokerNode> {
        self.brokers.get(&id)
    }

    pub fn partition(&self, tp: &TopicPartition) -> Option<&PartitionState> {
        self.partitions.get(tp)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(|tp| tp.topic.as_str())
    }
}

/// A replica's reported on-disk location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaLogDir {
    pub current_dir: Option<String>,
    pub future_dir: Option<String>,
}

/// Current per-broker metric readings used by the concurrency adjuster's
/// metric-based path.
#[derive(Debug, Clone, Default)]
pub struct BrokerMetrics {
    pub values: HashMap<BrokerId, HashMap<String, f64>>,
}

/// One task's submission to [`AdminInterface::alter_partition_reassignments`].
#[derive(Debug, Clone)]
pub struct ExecutionTaskSubmission {
    pub topic_partition: TopicPartition,
    pub new_replicas: Vec<BrokerId>,
}

/// Interface to the cluster's admin plane. All calls are asynchronous and
/// expected to be bounded by a caller-supplied timeout.
#[async_trait]
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait AdminInterface: Debug + Send + Sync {
    /// Submit reassignments; returns a per-partition outcome.
    async fn alter_partition_reassignments(
        &self,
        reassignments: Vec<ExecutionTaskSubmission>,
    ) -> Result<HashMap<TopicPartition, ReassignmentOutcome>, AdminInterfaceError>;

    /// Submit cancellations for the given partitions.
    async fn cancel_partition_reassignments(
        &self,
        partitions: Vec<TopicPartition>,
    ) -> Result<HashMap<TopicPartition, ReassignmentOutcome>, AdminInterfaceError>;

    /// Currently in-flight reassignments known to the admin plane.
    async fn list_partition_reassignments(
        &self,
    ) -> Result<HashMap<TopicPartition, Vec<BrokerId>>, AdminInterfaceError>;

    /// Per-topic configuration, used to read min-in-sync-replicas.
    async fn describe_configs(
        &self,
        topics: Vec<String>,
    ) -> Result<HashMap<String, HashMap<String, String>>, AdminInterfaceError>;

    /// Trigger preferred-leader election for the given partitions.
    async fn elect_preferred_leaders(
        &self,
        partitions: Vec<TopicPartition>,
    ) -> Result<HashMap<TopicPartition, ReassignmentOutcome>, AdminInterfaceError>;

    /// Current/future log directory for the given replicas.
    async fn describe_replica_log_dirs(
        &self,
        replicas: Vec<(TopicPartition, BrokerId)>,
    ) -> Result<HashMap<(TopicPartition, BrokerId), ReplicaLogDir>, AdminInterfaceError>;

    /// Set or clear a replication-throttle rate on the given brokers.
    async fn set_replication_throttle(
        &self,
        brokers: Vec<BrokerId>,
        bytes_per_sec: Option<u64>,
    ) -> Result<(), AdminInterfaceError>;
}

/// Cluster metadata, cached with explicit refresh.
#[async_trait]
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait MetadataClient: Debug + Send + Sync {
    /// Force a metadata refresh and return the new snapshot.
    async fn refresh(&self) -> Result<ClusterSnapshot, AdminInterfaceError>;
    /// Return the last cached snapshot without refreshing.
    async fn cluster(&self) -> ClusterSnapshot;
}

/// Sampling mode toggled around an execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    All,
    BrokerMetricsOnly,
    PartitionMetricsOnly,
}

/// Load-monitor collaborator: ISR health and broker metrics.
#[async_trait]
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait LoadMonitor: Debug + Send + Sync {
    async fn brokers_with_replicas(&self, timeout_ms: u64) -> Result<Vec<BrokerId>, LoadMonitorError>;
    async fn dead_brokers_with_replicas(&self, timeout_ms: u64) -> Result<Vec<BrokerId>, LoadMonitorError>;
    async fn current_broker_metric_values(&self) -> Result<BrokerMetrics, LoadMonitorError>;
    fn sampling_mode(&self) -> SamplingMode;
    fn set_sampling_mode(&self, mode: SamplingMode);
    async fn pause_metric_sampling(&self, reason: String, force: bool) -> Result<(), LoadMonitorError>;
    async fn resume_metric_sampling(&self, reason: String) -> Result<(), LoadMonitorError>;
}

/// User-task bookkeeping collaborator (out of scope for this crate's own
/// logic; invoked purely as a notification point).
#[async_trait]
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait UserTaskManager: Debug + Send + Sync {
    async fn mark_task_execution_began(&self, uuid: String);
    async fn mark_task_execution_finished(&self, uuid: String, completed_with_error: bool);
}

/// Anomaly-detector bookkeeping collaborator.
#[async_trait]
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait AnomalyDetectorManager: Debug + Send + Sync {
    async fn mark_self_healing_finished(&self, uuid: String, completed_with_error: bool);
}

/// Wall-clock source, abstracted so tests can supply a deterministic clock
/// instead of the real one.
pub trait Clock: Debug + Send + Sync {
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by the system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_millis() as u64
    }
}

/// Notification sink for operators.
#[async_trait]
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ExecutorNotifier: Debug + Send + Sync {
    async fn send_notification(&self, message: String);
    async fn send_alert(&self, message: String);
}

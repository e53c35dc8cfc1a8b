//! Queues of pending tasks by type, the in-progress set, and
//! aborted/dead/completed bookkeeping (C3).
//!
//! Concurrency admission (spec §4.1): for each candidate task, in queue
//! order, we'd increment provisional per-broker counters for every broker it
//! touches; a task is admitted iff every counter (plus the relevant
//! cluster-wide counter, for inter-broker and leader tasks) stays within the
//! current cap. Because the tracker hands out the *largest prefix* that
//! satisfies caps (not a best-effort subset), admission stops at the first
//! task that does not fit rather than skipping over it.

#[cfg(test)]
#[path = "task_tracker_test.rs"]
mod task_tracker_test;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::concurrency_manager::{ConcurrencyCaps, ConcurrencyManager};
use crate::phase::TasksSummary;
use crate::types::{BrokerId, ConcurrencyType, ExecutionProposal, ExecutionTask, TaskState, TaskType};

/// Options passed alongside a [`ReplicaMovementStrategy`] comparison;
/// reserved for future load-aware strategies (e.g. preferring to move the
/// partitions off the most loaded brokers first). Currently carries no
/// fields.
#[derive(Debug, Clone, Default)]
pub struct StrategyOptions;

/// Orders two candidate tasks of the same type for admission priority.
/// Implementations must be deterministic: ties are broken the same way on
/// every call so that test expectations and operator-visible ordering are
/// reproducible.
pub trait ReplicaMovementStrategy: Send + Sync {
    fn compare(&self, a: &ExecutionTask, b: &ExecutionTask, options: &StrategyOptions) -> Ordering;
}

/// Default strategy: order by topic-partition lexicographic order.
#[derive(Debug, Default)]
pub struct TopicPartitionLexOrderStrategy;

impl ReplicaMovementStrategy for TopicPartitionLexOrderStrategy {
    fn compare(&self, a: &ExecutionTask, b: &ExecutionTask, _options: &StrategyOptions) -> Ordering {
        a.proposal
            .topic_partition
            .cmp(&b.proposal.topic_partition)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Per-type, per-outcome completion counters, preserved across `clear()`
/// only within a single execution's lifetime (reset by `clear()`). The
/// `_bytes` fields mirror the task counts but in bytes of replica data
/// moved (always 0 for leader tasks, see [`TaskTracker::bytes_for`]).
#[derive(Debug, Clone, Copy, Default)]
struct TypeCounters {
    completed: usize,
    dead: usize,
    aborted: usize,
    completed_bytes: u64,
    dead_bytes: u64,
    aborted_bytes: u64,
}

/// Queues of pending tasks by type, the in-progress set, and
/// completion/death bookkeeping.
pub struct TaskTracker {
    next_id: AtomicU64,
    pending: HashMap<TaskType, VecDeque<ExecutionTask>>,
    in_execution: HashMap<u64, ExecutionTask>,
    counters: HashMap<TaskType, TypeCounters>,
    stop_requested: bool,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        let mut pending = HashMap::new();
        let mut counters = HashMap::new();
        for t in [TaskType::InterBrokerReplica, TaskType::IntraBrokerReplica, TaskType::Leader] {
            pending.insert(t, VecDeque::new());
            counters.insert(t, TypeCounters::default());
        }
        Self { next_id: AtomicU64::new(1), pending, in_execution: HashMap::new(), counters, stop_requested: false }
    }

    /// Expands each proposal into 0-3 tasks (inter-broker if the replica set
    /// differs, one intra-broker task per disk move, leader if the
    /// preferred leader differs), then orders each type's queue with
    /// `strategy`.
    pub fn add_proposals(
        &mut self,
        proposals: Vec<ExecutionProposal>,
        strategy: &dyn ReplicaMovementStrategy,
        strategy_options: &StrategyOptions,
    ) {
        for proposal in proposals {
            if proposal.requires_inter_broker_move() {
                let id = self.alloc_id();
                self.pending
                    .get_mut(&TaskType::InterBrokerReplica)
                    .unwrap()
                    .push_back(ExecutionTask::new(id, TaskType::InterBrokerReplica, proposal.clone(), None));
            }
            let mut disk_moves: Vec<BrokerId> = proposal.disk_moves_by_broker.keys().copied().collect();
            disk_moves.sort_unstable();
            for broker in disk_moves {
                let id = self.alloc_id();
                self.pending.get_mut(&TaskType::IntraBrokerReplica).unwrap().push_back(ExecutionTask::new(
                    id,
                    TaskType::IntraBrokerReplica,
                    proposal.clone(),
                    Some(broker),
                ));
            }
            if proposal.requires_leader_move() {
                let id = self.alloc_id();
                self.pending
                    .get_mut(&TaskType::Leader)
                    .unwrap()
                    .push_back(ExecutionTask::new(id, TaskType::Leader, proposal.clone(), None));
            }
        }
        for queue in self.pending.values_mut() {
            let mut as_vec: Vec<ExecutionTask> = queue.drain(..).collect();
            as_vec.sort_by(|a, b| strategy.compare(a, b, strategy_options));
            *queue = as_vec.into();
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn dim_for(task_type: TaskType) -> ConcurrencyType {
        match task_type {
            TaskType::InterBrokerReplica => ConcurrencyType::InterBrokerReplica,
            TaskType::IntraBrokerReplica => ConcurrencyType::IntraBrokerReplica,
            TaskType::Leader => ConcurrencyType::LeaderPerBroker,
        }
    }

    fn cluster_dim_for(task_type: TaskType) -> Option<ConcurrencyType> {
        match task_type {
            TaskType::InterBrokerReplica => Some(ConcurrencyType::InterBrokerReplica),
            TaskType::Leader => Some(ConcurrencyType::LeaderCluster),
            TaskType::IntraBrokerReplica => None,
        }
    }

    /// Current per-broker usage for `task_type` among tasks already
    /// in-progress or aborting (the baseline a new batch must add on top
    /// of).
    fn current_broker_usage(&self, task_type: TaskType) -> HashMap<BrokerId, u32> {
        let mut usage = HashMap::new();
        for task in self.in_execution.values() {
            if task.task_type != task_type {
                continue;
            }
            for broker in task.affected_brokers() {
                *usage.entry(broker).or_insert(0) += 1;
            }
        }
        usage
    }

    fn current_cluster_usage(&self, task_type: TaskType) -> u32 {
        self.in_execution.values().filter(|t| t.task_type == task_type).count() as u32
    }

    fn admissible_prefix(
        &self,
        task_type: TaskType,
        caps: &ConcurrencyCaps,
        brokers_skip_concurrency: &HashSet<BrokerId>,
    ) -> Vec<u64> {
        if self.stop_requested {
            return Vec::new();
        }
        let dim = Self::dim_for(task_type);
        let cluster_dim = Self::cluster_dim_for(task_type);
        let mut broker_usage = self.current_broker_usage(task_type);
        let mut cluster_usage = cluster_dim.map(|_| self.current_cluster_usage(task_type)).unwrap_or(0);
        let mut admitted = Vec::new();

        let Some(queue) = self.pending.get(&task_type) else {
            return admitted;
        };
        for task in queue.iter() {
            let brokers = task.affected_brokers();
            let mut fits = true;
            for broker in &brokers {
                if brokers_skip_concurrency.contains(broker) {
                    continue;
                }
                let cap = caps.broker_cap(dim, *broker).unwrap_or(u32::MAX);
                let current = broker_usage.get(broker).copied().unwrap_or(0);
                if current + 1 > cap {
                    fits = false;
                    break;
                }
            }
            if fits {
                if let Some(cdim) = cluster_dim {
                    let cap = caps.cluster_cap(cdim).unwrap_or(u32::MAX);
                    if cluster_usage + 1 > cap {
                        fits = false;
                    }
                }
            }
            if !fits {
                break;
            }
            for broker in &brokers {
                if brokers_skip_concurrency.contains(broker) {
                    continue;
                }
                *broker_usage.entry(*broker).or_insert(0) += 1;
            }
            if cluster_dim.is_some() {
                cluster_usage += 1;
            }
            admitted.push(task.id);
        }
        admitted
    }

    fn get_batch(
        &self,
        task_type: TaskType,
        concurrency: &ConcurrencyManager,
        brokers_skip_concurrency: &HashSet<BrokerId>,
    ) -> Vec<ExecutionTask> {
        let caps = concurrency.snapshot();
        let ids = self.admissible_prefix(task_type, &caps, brokers_skip_concurrency);
        let queue = &self.pending[&task_type];
        ids.iter()
            .filter_map(|id| queue.iter().find(|t| t.id == *id).cloned())
            .collect()
    }

    pub fn get_inter_broker_batch(
        &self,
        concurrency: &ConcurrencyManager,
        brokers_skip_concurrency: &HashSet<BrokerId>,
    ) -> Vec<ExecutionTask> {
        self.get_batch(TaskType::InterBrokerReplica, concurrency, brokers_skip_concurrency)
    }

    pub fn get_intra_broker_batch(
        &self,
        concurrency: &ConcurrencyManager,
        brokers_skip_concurrency: &HashSet<BrokerId>,
    ) -> Vec<ExecutionTask> {
        self.get_batch(TaskType::IntraBrokerReplica, concurrency, brokers_skip_concurrency)
    }

    pub fn get_leader_batch(
        &self,
        concurrency: &ConcurrencyManager,
        brokers_skip_concurrency: &HashSet<BrokerId>,
    ) -> Vec<ExecutionTask> {
        self.get_batch(TaskType::Leader, concurrency, brokers_skip_concurrency)
    }

    /// Moves each task from its pending queue into the in-execution set,
    /// transitioning it to `InProgress`. Panics if any id is not pending —
    /// a programmer error (the caller must only pass ids just returned by a
    /// `get_*_batch` call).
    pub fn mark_in_progress(&mut self, ids: &[u64], now_ms: u64) {
        for &id in ids {
            let queue = self
                .pending
                .values_mut()
                .find(|q| q.iter().any(|t| t.id == id))
                .expect("mark_in_progress: task not found in any pending queue");
            let pos = queue.iter().position(|t| t.id == id).unwrap();
            let mut task = queue.remove(pos).unwrap();
            task.mark_in_progress(now_ms);
            self.in_execution.insert(id, task);
        }
    }

    /// Bytes of replica data `task` moves; always 0 for a leader task, which
    /// only changes which replica is preferred leader.
    fn bytes_for(task: &ExecutionTask) -> u64 {
        match task.task_type {
            TaskType::Leader => 0,
            TaskType::InterBrokerReplica | TaskType::IntraBrokerReplica => task.proposal.data_size_bytes,
        }
    }

    pub fn mark_done(&mut self, id: u64, now_ms: u64) {
        let mut task = self.in_execution.remove(&id).expect("mark_done: task not in execution");
        task.mark_completed(now_ms);
        let bytes = Self::bytes_for(&task);
        let c = self.counters.get_mut(&task.task_type).unwrap();
        c.completed += 1;
        c.completed_bytes += bytes;
    }

    pub fn mark_aborting(&mut self, id: u64, now_ms: u64) {
        let task = self.in_execution.get_mut(&id).expect("mark_aborting: task not in execution");
        task.mark_aborting(now_ms);
    }

    /// Completes an aborting task as DONE (used when a topic is deleted
    /// mid-flight: the task terminates as ABORTING -> DONE, not DEAD).
    pub fn mark_aborted_done(&mut self, id: u64, now_ms: u64) {
        let mut task = self.in_execution.remove(&id).expect("mark_aborted_done: task not in execution");
        task.mark_completed(now_ms);
        let bytes = Self::bytes_for(&task);
        let c = self.counters.get_mut(&task.task_type).unwrap();
        c.completed += 1;
        c.completed_bytes += bytes;
    }

    pub fn mark_dead(&mut self, id: u64, now_ms: u64) {
        let mut task = self.in_execution.remove(&id).expect("mark_dead: task not in execution");
        task.mark_dead(now_ms);
        let bytes = Self::bytes_for(&task);
        let c = self.counters.get_mut(&task.task_type).unwrap();
        c.dead += 1;
        c.dead_bytes += bytes;
    }

    /// Current `IN_PROGRESS`/`ABORTING` tasks, optionally filtered by type.
    pub fn in_execution_tasks(&self, type_filter: Option<TaskType>) -> Vec<&ExecutionTask> {
        self.in_execution
            .values()
            .filter(|t| type_filter.map(|f| f == t.task_type).unwrap_or(true))
            .collect()
    }

    pub fn get_task(&self, id: u64) -> Option<&ExecutionTask> {
        self.in_execution.get(&id)
    }

    pub fn remaining(&self, task_type: TaskType) -> usize {
        self.pending[&task_type].len() + self.in_execution.values().filter(|t| t.task_type == task_type).count()
    }

    pub fn finished(&self, task_type: TaskType) -> usize {
        let c = self.counters[&task_type];
        c.completed + c.dead + c.aborted
    }

    /// Bytes still to move for `task_type`'s pending and in-progress tasks.
    /// Always 0 for [`TaskType::Leader`].
    pub fn remaining_bytes(&self, task_type: TaskType) -> u64 {
        self.pending[&task_type].iter().map(Self::bytes_for).sum::<u64>()
            + self
                .in_execution
                .values()
                .filter(|t| t.task_type == task_type)
                .map(Self::bytes_for)
                .sum::<u64>()
    }

    /// Bytes moved (or that would have been moved, for dead/aborted tasks)
    /// by `task_type`'s finished tasks. Always 0 for [`TaskType::Leader`].
    pub fn finished_bytes(&self, task_type: TaskType) -> u64 {
        let c = self.counters[&task_type];
        c.completed_bytes + c.dead_bytes + c.aborted_bytes
    }

    pub fn summary(&self) -> TasksSummary {
        TasksSummary {
            remaining_inter_broker: self.remaining(TaskType::InterBrokerReplica),
            remaining_intra_broker: self.remaining(TaskType::IntraBrokerReplica),
            remaining_leader: self.remaining(TaskType::Leader),
            finished_inter_broker: self.finished(TaskType::InterBrokerReplica),
            finished_intra_broker: self.finished(TaskType::IntraBrokerReplica),
            finished_leader: self.finished(TaskType::Leader),
            remaining_inter_broker_bytes: self.remaining_bytes(TaskType::InterBrokerReplica),
            remaining_intra_broker_bytes: self.remaining_bytes(TaskType::IntraBrokerReplica),
            finished_inter_broker_bytes: self.finished_bytes(TaskType::InterBrokerReplica),
            finished_intra_broker_bytes: self.finished_bytes(TaskType::IntraBrokerReplica),
        }
    }

    /// Forbids future batch admission. Does not mutate any existing task.
    pub fn set_stop_requested(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Resets all state. Legal only from `NoTask` or at execution
    /// completion — callers (the [`crate::executor::Executor`]) are
    /// responsible for only calling this between executions.
    pub fn clear(&mut self) {
        for queue in self.pending.values_mut() {
            queue.clear();
        }
        self.in_execution.clear();
        for c in self.counters.values_mut() {
            *c = TypeCounters::default();
        }
        self.stop_requested = false;
    }
}

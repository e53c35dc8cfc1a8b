//! Drives one phase's task queue to completion (C7).
//!
//! [`ExecutionLoop`] is not a top-level task; [`crate::executor::Executor`]
//! calls [`ExecutionLoop::run_phase`] once per ordered phase
//! (inter-broker, then intra-broker, then leader) and reacts to its
//! outcome. Each call to `run_phase` loops internally: submit whatever the
//! task tracker currently admits, poll the admin interface for progress,
//! detect and re-execute or kill stalled tasks, and sleep until the next
//! progress-check tick — returning only once the phase's queue is drained
//! or a stop has been observed.

#[cfg(test)]
#[path = "execution_loop_test.rs"]
mod execution_loop_test;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::concurrency_manager::ConcurrencyManager;
use crate::config::ExecutorConfig;
use crate::metrics::{incr_reexecutions, incr_rollbacks, incr_tasks_completed, incr_tasks_dead, set_in_progress_tasks};
use crate::phase::Phase;
use crate::task_tracker::TaskTracker;
use crate::throttle::ThrottleHelper;
use crate::types::{
    AdminInterface,
    BrokerId,
    ExecutionTaskSubmission,
    MetadataClient,
    ReassignmentOutcome,
    TaskType,
};

fn task_type_for(phase: Phase) -> TaskType {
    match phase {
        Phase::InterBroker => TaskType::InterBrokerReplica,
        Phase::IntraBroker => TaskType::IntraBrokerReplica,
        Phase::Leader => TaskType::Leader,
    }
}

fn task_type_label(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::InterBrokerReplica => "inter_broker_replica",
        TaskType::IntraBrokerReplica => "intra_broker_replica",
        TaskType::Leader => "leader",
    }
}

/// Drives a single phase's queue: repeated submit/poll/sleep ticks.
pub struct ExecutionLoop {
    config: ExecutorConfig,
    concurrency: Arc<ConcurrencyManager>,
    admin: Arc<dyn AdminInterface>,
    metadata: Arc<dyn MetadataClient>,
    progress_check_interval_ms: Arc<AtomicU64>,
}

impl ExecutionLoop {
    pub fn new(
        config: ExecutorConfig,
        concurrency: Arc<ConcurrencyManager>,
        admin: Arc<dyn AdminInterface>,
        metadata: Arc<dyn MetadataClient>,
        progress_check_interval_ms: Arc<AtomicU64>,
    ) -> Self {
        Self { config, concurrency, admin, metadata, progress_check_interval_ms }
    }

    /// Runs `phase` to completion, or until `should_stop` reports true (in
    /// which case the tracker is marked stop-requested and the phase
    /// returns once its already-in-progress tasks settle).
    #[instrument(skip_all, fields(%phase))]
    pub async fn run_phase(
        &self,
        phase: Phase,
        tracker: &mut TaskTracker,
        throttle: &ThrottleHelper,
        brokers_skip_concurrency: &HashSet<BrokerId>,
        now_ms: impl Fn() -> u64,
        mut should_stop: impl FnMut() -> bool,
    ) -> Result<(), crate::types::ExecutorError> {
        let task_type = task_type_for(phase);
        loop {
            if should_stop() {
                tracker.set_stop_requested();
            }

            self.submit_admissible(phase, tracker, brokers_skip_concurrency, now_ms()).await?;

            if phase == Phase::InterBroker {
                let in_progress = tracker.in_execution_tasks(Some(TaskType::InterBrokerReplica));
                throttle.reconcile(&in_progress, &*self.admin).await?;
            }

            self.check_progress(phase, tracker, now_ms()).await?;
            set_in_progress_tasks(task_type_label(task_type), tracker.in_execution_tasks(Some(task_type)).len() as u64);

            let remaining = tracker.remaining(task_type);
            if remaining == 0 {
                info!(%phase, "phase drained");
                return Ok(());
            }
            debug!(%phase, remaining, "phase still in progress");

            tokio::time::sleep(Duration::from_millis(self.progress_check_interval_ms.load(AtomicOrdering::Relaxed))).await;
        }
    }

    async fn submit_admissible(
        &self,
        phase: Phase,
        tracker: &mut TaskTracker,
        brokers_skip_concurrency: &HashSet<BrokerId>,
        now_ms: u64,
    ) -> Result<(), crate::types::ExecutorError> {
        let task_type = task_type_for(phase);
        let batch = match phase {
            Phase::InterBroker => tracker.get_inter_broker_batch(&self.concurrency, brokers_skip_concurrency),
            Phase::IntraBroker => tracker.get_intra_broker_batch(&self.concurrency, brokers_skip_concurrency),
            Phase::Leader => tracker.get_leader_batch(&self.concurrency, brokers_skip_concurrency),
        };
        if batch.is_empty() {
            return Ok(());
        }
        let ids: Vec<u64> = batch.iter().map(|t| t.id).collect();

        let outcomes = match phase {
            Phase::InterBroker => {
                let submissions = batch
                    .iter()
                    .map(|t| ExecutionTaskSubmission {
                        topic_partition: t.proposal.topic_partition.clone(),
                        new_replicas: t.proposal.new_replicas.clone(),
                    })
                    .collect();
                self.admin.alter_partition_reassignments(submissions).await?
            }
            Phase::IntraBroker => {
                // Intra-broker moves ride the same reassignment API with an
                // unchanged replica set; the admin plane reads the desired
                // log directory from a side channel the proposal already
                // carries, so there's nothing further to submit here beyond
                // marking the task in progress.
                std::collections::HashMap::new()
            }
            Phase::Leader => {
                let partitions = batch.iter().map(|t| t.proposal.topic_partition.clone()).collect();
                self.admin.elect_preferred_leaders(partitions).await?
            }
        };

        tracker.mark_in_progress(&ids, now_ms);
        info!(%task_type, submitted = ids.len(), "submitted batch for execution");

        if phase == Phase::InterBroker {
            let dead_on_submission: Vec<u64> = batch
                .iter()
                .filter(|t| outcomes.get(&t.proposal.topic_partition) == Some(&ReassignmentOutcome::BrokerUnavailable))
                .map(|t| t.id)
                .collect();
            if !dead_on_submission.is_empty() {
                warn!(%task_type, count = dead_on_submission.len(), "broker unavailable for submission, task(s) dead on arrival");
                self.kill_and_rollback_inter_broker(tracker, &dead_on_submission, now_ms).await?;
            }
        }

        Ok(())
    }

    /// Marks the given inter-broker tasks `DEAD` and submits a reassignment
    /// back to each task's original replica set, per the "marking a task DEAD
    /// is terminal and triggers rollback" rule.
    async fn kill_and_rollback_inter_broker(
        &self,
        tracker: &mut TaskTracker,
        ids: &[u64],
        now_ms: u64,
    ) -> Result<(), crate::types::ExecutorError> {
        let rollback_submissions: Vec<ExecutionTaskSubmission> = ids
            .iter()
            .filter_map(|id| tracker.get_task(*id))
            .map(|t| ExecutionTaskSubmission {
                topic_partition: t.proposal.topic_partition.clone(),
                new_replicas: t.proposal.old_replicas.clone(),
            })
            .collect();
        for &id in ids {
            tracker.mark_dead(id, now_ms);
        }
        incr_tasks_dead(task_type_label(TaskType::InterBrokerReplica));
        incr_rollbacks(rollback_submissions.len() as u64);
        if !rollback_submissions.is_empty() {
            self.admin.alter_partition_reassignments(rollback_submissions).await?;
        }
        Ok(())
    }

    async fn check_progress(
        &self,
        phase: Phase,
        tracker: &mut TaskTracker,
        now_ms: u64,
    ) -> Result<(), crate::types::ExecutorError> {
        match phase {
            Phase::InterBroker => self.check_inter_broker_progress(tracker, now_ms).await,
            Phase::IntraBroker => self.check_intra_broker_progress(tracker, now_ms).await,
            Phase::Leader => self.check_leader_progress(tracker, now_ms).await,
        }
    }

    async fn check_inter_broker_progress(
        &self,
        tracker: &mut TaskTracker,
        now_ms: u64,
    ) -> Result<(), crate::types::ExecutorError> {
        let in_progress = tracker.in_execution_tasks(Some(TaskType::InterBrokerReplica));
        if in_progress.is_empty() {
            return Ok(());
        }
        let stop_requested = tracker.is_stop_requested();
        let still_reassigning = self.admin.list_partition_reassignments().await?;
        let cluster = self.metadata.cluster().await;

        let mut done = Vec::new();
        let mut dead = Vec::new();
        let mut aborting = Vec::new();
        let mut reexecute: Vec<(u64, ExecutionTaskSubmission)> = Vec::new();
        for task in &in_progress {
            if stop_requested {
                dead.push(task.id);
                continue;
            }
            let state = cluster.partition(&task.proposal.topic_partition);
            let topic_gone = state.map(|s| !s.exists).unwrap_or(false);
            if topic_gone {
                info!(task_id = task.id, "topic deleted mid-flight, task done via abort");
                aborting.push(task.id);
                continue;
            }
            let any_broker_missing = task.proposal.new_replicas.iter().any(|b| cluster.broker(*b).is_none());
            if any_broker_missing {
                warn!(task_id = task.id, "target broker absent from cluster metadata, task dead");
                dead.push(task.id);
                continue;
            }
            if state.map(|s| s.replicas == task.proposal.new_replicas).unwrap_or(false) {
                done.push(task.id);
                continue;
            }
            if !still_reassigning.contains_key(&task.proposal.topic_partition) {
                reexecute.push((
                    task.id,
                    ExecutionTaskSubmission {
                        topic_partition: task.proposal.topic_partition.clone(),
                        new_replicas: task.proposal.new_replicas.clone(),
                    },
                ));
            }
        }

        let done_count = done.len();
        for id in done {
            tracker.mark_done(id, now_ms);
        }
        if done_count > 0 {
            incr_tasks_completed(task_type_label(TaskType::InterBrokerReplica));
        }

        for id in &aborting {
            tracker.mark_aborting(*id, now_ms);
            tracker.mark_aborted_done(*id, now_ms);
        }

        if !dead.is_empty() {
            self.kill_and_rollback_inter_broker(tracker, &dead, now_ms).await?;
        }

        // Blocked tick: nothing finished, nothing died, but tasks that
        // vanished from the admin's reassignment list haven't reached their
        // target replica set either. A controller failover can drop an
        // in-flight reassignment from the list without completing it;
        // re-submit rather than assume it finished.
        if done_count == 0 && !reexecute.is_empty() {
            warn!(count = reexecute.len(), "re-executing inter-broker tasks absent from admin reassignment list");
            let submissions = reexecute.iter().map(|(_, s)| s.clone()).collect();
            self.admin.alter_partition_reassignments(submissions).await?;
            incr_reexecutions(reexecute.len() as u64);
        }
        Ok(())
    }

    async fn check_intra_broker_progress(
        &self,
        tracker: &mut TaskTracker,
        now_ms: u64,
    ) -> Result<(), crate::types::ExecutorError> {
        let in_progress = tracker.in_execution_tasks(Some(TaskType::IntraBrokerReplica));
        if in_progress.is_empty() {
            return Ok(());
        }
        if tracker.is_stop_requested() {
            let ids: Vec<u64> = in_progress.iter().map(|t| t.id).collect();
            let count = ids.len();
            for id in ids {
                tracker.mark_dead(id, now_ms);
            }
            incr_tasks_dead(task_type_label(TaskType::IntraBrokerReplica));
            info!(count, "stop requested, in-progress intra-broker tasks marked dead");
            return Ok(());
        }
        let replicas: Vec<_> = in_progress
            .iter()
            .filter_map(|t| t.broker_id.map(|b| (t.proposal.topic_partition.clone(), b)))
            .collect();
        let dirs = self.admin.describe_replica_log_dirs(replicas).await?;

        let mut done = Vec::new();
        for task in &in_progress {
            let Some(broker) = task.broker_id else { continue };
            let key = (task.proposal.topic_partition.clone(), broker);
            let Some(dir) = dirs.get(&key) else { continue };
            let Some(desired) = task.proposal.disk_moves_by_broker.get(&broker) else { continue };
            if dir.current_dir.as_deref() == Some(desired.new_log_dir.as_str()) && dir.future_dir.is_none() {
                done.push(task.id);
            }
        }
        let done_count = done.len();
        for id in done {
            tracker.mark_done(id, now_ms);
        }
        if done_count > 0 {
            incr_tasks_completed(task_type_label(TaskType::IntraBrokerReplica));
        }
        Ok(())
    }

    async fn check_leader_progress(
        &self,
        tracker: &mut TaskTracker,
        now_ms: u64,
    ) -> Result<(), crate::types::ExecutorError> {
        let in_progress = tracker.in_execution_tasks(Some(TaskType::Leader));
        if in_progress.is_empty() {
            return Ok(());
        }
        if tracker.is_stop_requested() {
            let ids: Vec<u64> = in_progress.iter().map(|t| t.id).collect();
            let count = ids.len();
            for id in ids {
                tracker.mark_dead(id, now_ms);
            }
            incr_tasks_dead(task_type_label(TaskType::Leader));
            info!(count, "stop requested, in-progress leader tasks marked dead");
            return Ok(());
        }
        let cluster = self.metadata.cluster().await;

        let mut done = Vec::new();
        let mut dead = Vec::new();
        for task in &in_progress {
            let current_leader = cluster.partition(&task.proposal.topic_partition).and_then(|p| p.leader);
            if current_leader == task.proposal.new_leader {
                done.push(task.id);
                continue;
            }
            let elapsed = task.start_time_ms.map(|s| now_ms.saturating_sub(s)).unwrap_or(0);
            if elapsed > self.config.leader_movement_timeout_ms {
                warn!(task_id = task.id, elapsed_ms = elapsed, "leader movement timed out");
                dead.push(task.id);
            }
        }
        let done_count = done.len();
        let dead_count = dead.len();
        for id in done {
            tracker.mark_done(id, now_ms);
        }
        for id in dead {
            tracker.mark_dead(id, now_ms);
        }
        if done_count > 0 {
            incr_tasks_completed(task_type_label(TaskType::Leader));
        }
        if dead_count > 0 {
            incr_tasks_dead(task_type_label(TaskType::Leader));
        }
        Ok(())
    }
}

//! Top-level lifecycle for driving one batch of execution proposals to
//! completion (C6).
//!
//! [`Executor`] is the crate's primary entrypoint: [`Executor::execute_proposals`]
//! validates preconditions, primes the collaborators, and spawns a
//! background task that runs [`crate::execution_loop::ExecutionLoop`] over
//! the three ordered phases (inter-broker replica moves, then intra-broker
//! disk moves, then leader elections), publishing [`ExecutorState`] after
//! every transition. At most one execution may be in flight per `Executor`;
//! two semaphores enforce this without blocking callers: `execution_permit`
//! is held for an execution's entire lifetime and makes a second
//! `execute_proposals` call fail fast with [`ExecutorError::OngoingExecution`],
//! while `lifecycle_lock` serializes the brief state-transition critical
//! sections of `execute_proposals` and `user_trigger_stop` against each
//! other so they can't race on the published [`ExecutorState`].

#[cfg(test)]
#[path = "executor_test.rs"]
mod executor_test;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::concurrency_adjuster::{AdjusterRecommendation, ConcurrencyAdjuster};
use crate::concurrency_manager::ConcurrencyManager;
use crate::config::ExecutorConfig;
use crate::execution_loop::ExecutionLoop;
use crate::history::BrokerHistory;
use crate::metrics::{incr_stopped_by_system, incr_stopped_by_user};
use crate::min_isr_cache::MinIsrCache;
use crate::phase::{ExecutorState, ExecutorStatePayload, Phase};
use crate::task_tracker::{StrategyOptions, TaskTracker, TopicPartitionLexOrderStrategy};
use crate::throttle::ThrottleHelper;
use crate::types::{
    AdminInterface,
    AnomalyDetectorManager,
    BrokerId,
    Clock,
    ConcurrencyType,
    ExecutionProposal,
    ExecutorError,
    ExecutorNotifier,
    LoadMonitor,
    MetadataClient,
    SystemClock,
    UserTaskManager,
};

/// The concrete external collaborators an [`Executor`] talks to. Bundled so
/// `Executor::new`'s signature doesn't grow one parameter per trait.
pub struct ExecutorCollaborators {
    pub admin: Arc<dyn AdminInterface>,
    pub metadata: Arc<dyn MetadataClient>,
    pub load_monitor: Arc<dyn LoadMonitor>,
    pub user_task_manager: Arc<dyn UserTaskManager>,
    pub anomaly_detector_manager: Arc<dyn AnomalyDetectorManager>,
    pub notifier: Arc<dyn ExecutorNotifier>,
}

/// Drives execution proposals to completion and publishes lifecycle state.
pub struct Executor {
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
    collaborators: ExecutorCollaborators,
    concurrency: Arc<ConcurrencyManager>,
    min_isr_cache: Arc<MinIsrCache>,
    history: Arc<BrokerHistory>,
    concurrency_adjuster: Arc<ConcurrencyAdjuster>,
    throttle: Arc<ThrottleHelper>,
    execution_loop: ExecutionLoop,
    state: ArcSwap<ExecutorState>,
    execution_permit: Arc<Semaphore>,
    lifecycle_lock: AsyncMutex<()>,
    stop_flag: Arc<AtomicBool>,
    progress_check_interval_ms: Arc<AtomicU64>,
    shutdown_requested: AtomicBool,
}

impl Executor {
    pub fn new(config: ExecutorConfig, collaborators: ExecutorCollaborators) -> Arc<Self> {
        Self::with_clock(config, collaborators, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ExecutorConfig, collaborators: ExecutorCollaborators, clock: Arc<dyn Clock>) -> Arc<Self> {
        crate::metrics::register_metrics();
        let concurrency = Arc::new(ConcurrencyManager::new(config.concurrency_adjuster.bounds.clone()));
        let min_isr_cache = Arc::new(MinIsrCache::new(&config.min_isr_cache));
        let history = Arc::new(BrokerHistory::new(&config.history));
        let concurrency_adjuster = Arc::new(ConcurrencyAdjuster::new(
            config.concurrency_adjuster.clone(),
            concurrency.clone(),
            min_isr_cache.clone(),
        ));
        let throttle = Arc::new(ThrottleHelper::new(config.replication_throttle_bytes_per_sec));
        let progress_check_interval_ms = Arc::new(AtomicU64::new(config.execution_progress_check_interval_ms));
        let execution_loop = ExecutionLoop::new(
            config.clone(),
            concurrency.clone(),
            collaborators.admin.clone(),
            collaborators.metadata.clone(),
            progress_check_interval_ms.clone(),
        );

        let scan_interval_ms = config.history.scan_interval_ms;
        let history_scanner_clock = clock.clone();
        let history_for_scanner = history.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(scan_interval_ms)).await;
                history_for_scanner.evict_expired(history_scanner_clock.now_ms());
            }
        });

        Arc::new(Self {
            config,
            clock,
            collaborators,
            concurrency,
            min_isr_cache,
            history,
            concurrency_adjuster,
            throttle,
            execution_loop,
            state: ArcSwap::from_pointee(ExecutorState::NoTask),
            execution_permit: Arc::new(Semaphore::new(1)),
            lifecycle_lock: AsyncMutex::new(()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            progress_check_interval_ms,
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> Arc<ExecutorState> {
        self.state.load_full()
    }

    pub fn is_executing(&self) -> bool {
        !self.state.load().is_no_task()
    }

    pub fn concurrency_manager(&self) -> &Arc<ConcurrencyManager> {
        &self.concurrency
    }

    pub fn history(&self) -> &Arc<BrokerHistory> {
        &self.history
    }

    pub fn min_isr_cache(&self) -> &Arc<MinIsrCache> {
        &self.min_isr_cache
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Alias for [`Self::is_executing`], mirroring `hasOngoingExecution()`.
    pub fn has_ongoing_execution(&self) -> bool {
        self.is_executing()
    }

    pub fn is_concurrency_manager_initialized(&self) -> bool {
        self.concurrency.is_initialized()
    }

    pub fn is_concurrency_adjuster_started(&self) -> bool {
        self.concurrency_adjuster.is_started()
    }

    /// Runtime override for the delay between progress-check ticks.
    /// `None` restores the configured default; `Some(ms)` is clamped to
    /// `min_execution_progress_check_interval_ms` so a caller can't drive
    /// the progress-check loop into a tight spin.
    pub fn set_requested_execution_progress_check_interval_ms(&self, interval_ms: Option<u64>) {
        let clamped =
            interval_ms.unwrap_or(self.config.execution_progress_check_interval_ms).max(self.config.min_execution_progress_check_interval_ms);
        self.progress_check_interval_ms.store(clamped, AtomicOrdering::Relaxed);
        info!(requested = ?interval_ms, applied = clamped, "execution progress check interval updated");
    }

    pub fn set_concurrency_adjuster_for(&self, dim: ConcurrencyType, enabled: bool) {
        self.concurrency_adjuster.set_enabled(dim, enabled);
    }

    pub fn set_concurrency_adjuster_min_isr_check(&self, enabled: bool) {
        self.concurrency_adjuster.set_min_isr_check_enabled(enabled);
    }

    pub fn add_recently_demoted_broker(&self, broker: BrokerId, permanent: bool) {
        self.history.add_to_demotion_history(broker, self.clock.now_ms(), permanent);
    }

    pub fn drop_recently_demoted_broker(&self, broker: BrokerId) {
        self.history.clear_demotion(broker);
    }

    pub fn add_recently_removed_broker(&self, broker: BrokerId, permanent: bool) {
        self.history.add_to_removal_history(broker, self.clock.now_ms(), permanent);
    }

    pub fn drop_recently_removed_broker(&self, broker: BrokerId) {
        self.history.clear_removal(broker);
    }

    pub fn recently_demoted_brokers(&self) -> Vec<BrokerId> {
        self.history.recently_demoted(self.clock.now_ms())
    }

    pub fn recently_removed_brokers(&self) -> Vec<BrokerId> {
        self.history.recently_removed(self.clock.now_ms())
    }

    fn generate_uuid(&self) -> String {
        format!("{:032x}", rand::random::<u128>())
    }

    /// Submit a batch of proposals for execution. Returns once the
    /// execution has been admitted and a background task spawned to drive
    /// it; does not block for the execution to finish.
    ///
    /// Before admitting, checks that no partition reassignment is already
    /// known to the admin plane (no external agent driving a reassignment of
    /// its own). If either that check or priming the run (refreshing
    /// metadata, seeding concurrency) fails, the `GeneratingProposals` state
    /// published at the top of the call is reverted back to `NoTask` rather
    /// than left stuck, mirroring `failGeneratingProposalsForExecution`.
    #[instrument(skip_all, fields(triggered_by_user))]
    pub async fn execute_proposals(
        self: &Arc<Self>,
        proposals: Vec<ExecutionProposal>,
        brokers_skip_concurrency: HashSet<BrokerId>,
        requested_concurrency: std::collections::HashMap<ConcurrencyType, u32>,
        triggered_by_user: bool,
        reason: String,
    ) -> Result<(), ExecutorError> {
        if self.shutdown_requested.load(AtomicOrdering::Relaxed) {
            return Err(ExecutorError::IllegalState("executor is shutting down".to_string()));
        }
        let permit = self.execution_permit.clone().try_acquire_owned().map_err(|_| ExecutorError::OngoingExecution)?;

        let uuid = self.generate_uuid();
        let now_ms = self.clock.now_ms();
        {
            let _guard = self.lifecycle_lock.lock().await;
            if !self.state.load().is_no_task() {
                return Err(ExecutorError::OngoingExecution);
            }
            let payload = ExecutorStatePayload {
                uuid: uuid.clone(),
                reason: reason.clone(),
                started_at_ms: now_ms,
                triggered_by_user,
                recently_demoted: self.history.recently_demoted(now_ms),
                recently_removed: self.history.recently_removed(now_ms),
                ..Default::default()
            };
            self.state.store(Arc::new(ExecutorState::GeneratingProposals(payload)));
        }

        if let Err(e) = self.check_no_external_agent_active().await {
            self.fail_generating_proposals(&uuid).await;
            return Err(e);
        }

        let primed = async {
            let cluster = self.collaborators.metadata.refresh().await?;
            let brokers: Vec<BrokerId> = cluster.brokers.keys().copied().collect();
            self.concurrency.initialize(&brokers, &requested_concurrency);
            let mut tracker = TaskTracker::new();
            tracker.add_proposals(proposals, &TopicPartitionLexOrderStrategy, &StrategyOptions::default());
            Ok::<_, ExecutorError>(tracker)
        }
        .await;

        let mut tracker = match primed {
            Ok(tracker) => tracker,
            Err(e) => {
                self.fail_generating_proposals(&uuid).await;
                return Err(e);
            }
        };

        self.collaborators.user_task_manager.mark_task_execution_began(uuid.clone()).await;

        self.stop_flag.store(false, AtomicOrdering::Relaxed);
        self.publish_phase_state(ExecutorState::Starting, &uuid, &tracker, now_ms, triggered_by_user, &reason);

        let this = self.clone();
        tokio::spawn(async move {
            this.run_execution(uuid, tracker, brokers_skip_concurrency, now_ms, triggered_by_user, reason, permit).await;
        });

        Ok(())
    }

    /// No partition reassignment known to the admin plane, i.e. no external
    /// agent currently driving one of its own.
    async fn check_no_external_agent_active(&self) -> Result<(), ExecutorError> {
        let in_flight = self.collaborators.admin.list_partition_reassignments().await?;
        if !in_flight.is_empty() {
            return Err(ExecutorError::IllegalState(format!(
                "{} partition reassignment(s) already in flight, refusing to start",
                in_flight.len()
            )));
        }
        Ok(())
    }

    /// Reverts a `GeneratingProposals(uuid)` state back to `NoTask`, but only
    /// if it's still the state we published (a racing `user_trigger_stop`
    /// can't happen here since both hold `lifecycle_lock`, but a defensive
    /// uuid check costs nothing).
    async fn fail_generating_proposals(&self, uuid: &str) {
        let _guard = self.lifecycle_lock.lock().await;
        if self.state.load().uuid() == Some(uuid) {
            self.state.store(Arc::new(ExecutorState::NoTask));
        }
    }

    /// Request that the current execution stop. Idempotent: calling it
    /// again while already stopping is a no-op. Draining already-in-progress
    /// tasks to a terminal state still happens asynchronously in the
    /// background task; this call only flips the flag and publishes
    /// `Stopping`.
    ///
    /// `stop_external_agent`, when true, also requests cancellation of any
    /// partition reassignment the admin plane reports that this executor
    /// didn't submit itself (e.g. one driven by an external rebalancing
    /// tool). If a local execution is also in progress, that cancellation is
    /// silently skipped rather than raced against the local stop — this
    /// mirrors the upstream behavior; a future version could surface this as
    /// a distinct outcome instead of silently dropping it.
    #[instrument(skip_all, fields(stop_external_agent))]
    pub async fn user_trigger_stop(&self, reason: String, stop_external_agent: bool) -> Result<(), ExecutorError> {
        let _guard = self.lifecycle_lock.lock().await;
        let current = self.state.load_full();

        if current.is_no_task() {
            if stop_external_agent {
                self.cancel_external_agent_reassignments().await?;
                info!("no local execution in progress, cancelled external agent reassignments");
                return Ok(());
            }
            return Err(ExecutorError::IllegalState("no execution in progress to stop".to_string()));
        }

        self.stop_flag.store(true, AtomicOrdering::Relaxed);
        if let Some(payload) = current.payload() {
            let mut next = payload.clone();
            next.reason = reason;
            self.state.store(Arc::new(ExecutorState::Stopping(next)));
        }
        if stop_external_agent {
            warn!("stop_external_agent requested alongside an ongoing local execution, skipping external cancellation");
        }
        incr_stopped_by_user();
        info!("user requested stop");
        Ok(())
    }

    async fn cancel_external_agent_reassignments(&self) -> Result<(), ExecutorError> {
        let in_flight = self.collaborators.admin.list_partition_reassignments().await?;
        if in_flight.is_empty() {
            return Ok(());
        }
        let partitions = in_flight.into_keys().collect();
        self.collaborators.admin.cancel_partition_reassignments(partitions).await?;
        Ok(())
    }

    /// Stops accepting new executions and, if one is currently in progress,
    /// requests it stop. Irreversible: no further `execute_proposals` call
    /// will succeed after this.
    #[instrument(skip_all)]
    pub async fn shutdown(self: &Arc<Self>) -> Result<(), ExecutorError> {
        self.shutdown_requested.store(true, AtomicOrdering::Relaxed);
        if self.is_executing() {
            self.user_trigger_stop("executor shutting down".to_string(), false).await?;
        }
        info!("executor shutdown requested");
        Ok(())
    }

    fn publish_phase_state(
        &self,
        build: impl FnOnce(ExecutorStatePayload) -> ExecutorState,
        uuid: &str,
        tracker: &TaskTracker,
        started_at_ms: u64,
        triggered_by_user: bool,
        reason: &str,
    ) {
        let now_ms = self.clock.now_ms();
        let concurrency_summary = [
            (Phase::InterBroker, ConcurrencyType::InterBrokerReplica),
            (Phase::IntraBroker, ConcurrencyType::IntraBrokerReplica),
            (Phase::Leader, ConcurrencyType::LeaderPerBroker),
        ]
        .into_iter()
        .map(|(phase, dim)| (phase, self.concurrency.get_execution_concurrency_summary(dim)))
        .collect();
        let payload = ExecutorStatePayload {
            uuid: uuid.to_string(),
            reason: reason.to_string(),
            started_at_ms,
            triggered_by_user,
            recently_demoted: self.history.recently_demoted(now_ms),
            recently_removed: self.history.recently_removed(now_ms),
            tasks_summary: tracker.summary(),
            concurrency_summary,
        };
        self.state.store(Arc::new(build(payload)));
    }

    #[instrument(skip_all, fields(%uuid))]
    async fn run_execution(
        self: Arc<Self>,
        uuid: String,
        mut tracker: TaskTracker,
        brokers_skip_concurrency: HashSet<BrokerId>,
        started_at_ms: u64,
        triggered_by_user: bool,
        reason: String,
        _permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let mut completed_with_error = false;

        'phases: for phase in [Phase::InterBroker, Phase::IntraBroker, Phase::Leader] {
            if self.stop_flag.load(AtomicOrdering::Relaxed) {
                break;
            }

            match self.collaborators.metadata.refresh().await {
                Ok(cluster) => {
                    match self
                        .concurrency_adjuster
                        .tick(self.clock.now_ms(), phase, &cluster, &*self.collaborators.load_monitor, &*self.collaborators.admin)
                        .await
                    {
                        Ok(AdjusterRecommendation::StopExecution { under_min_isr_count }) => {
                            warn!(under_min_isr_count, "concurrency adjuster recommended stopping the execution");
                            self.stop_flag.store(true, AtomicOrdering::Relaxed);
                            incr_stopped_by_system();
                        }
                        Ok(AdjusterRecommendation::Continue) => {}
                        Err(e) => warn!(error = %e, "concurrency adjuster tick failed"),
                    }
                }
                Err(e) => warn!(error = %e, "failed to refresh cluster metadata before phase"),
            }

            if self.stop_flag.load(AtomicOrdering::Relaxed) {
                break;
            }

            self.publish_phase_state(
                |p| ExecutorState::for_phase(phase, p),
                &uuid,
                &tracker,
                started_at_ms,
                triggered_by_user,
                &reason,
            );

            loop {
                let result = self
                    .execution_loop
                    .run_phase(phase, &mut tracker, &self.throttle, &brokers_skip_concurrency, || self.clock.now_ms(), || {
                        self.stop_flag.load(AtomicOrdering::Relaxed)
                    })
                    .await;
                match result {
                    Ok(()) => break,
                    Err(ExecutorError::AdminTransient(msg)) => {
                        warn!(error = %msg, "transient admin error during phase, retrying");
                        let interval_ms = self.progress_check_interval_ms.load(AtomicOrdering::Relaxed);
                        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, %phase, "phase failed");
                        completed_with_error = true;
                        break 'phases;
                    }
                }
            }
        }

        if let Err(e) = self.throttle.clear_all(&*self.collaborators.admin).await {
            warn!(error = %e, "failed to clear replication throttle after execution");
        }

        self.state.store(Arc::new(ExecutorState::NoTask));
        self.stop_flag.store(false, AtomicOrdering::Relaxed);

        self.collaborators.user_task_manager.mark_task_execution_finished(uuid.clone(), completed_with_error).await;
        if !triggered_by_user {
            self.collaborators.anomaly_detector_manager.mark_self_healing_finished(uuid.clone(), completed_with_error).await;
        }
        self.collaborators
            .notifier
            .send_notification(format!("execution {uuid} finished, completed_with_error={completed_with_error}"))
            .await;
        info!(completed_with_error, "execution finished");
    }
}

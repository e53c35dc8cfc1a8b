//! The executor's top-level lifecycle state, published atomically.
//!
//! [`ExecutorState`] is a tagged union over the phases an execution passes
//! through. It carries a common payload (`ExecutorStatePayload`) rather than
//! a full manual AST state machine: each variant's fields are filled in as
//! they become known (e.g. `tasks_summary` is only meaningful once an
//! execution reaches a `*InProgress` phase) and left at their defaults
//! otherwise. Transitions between variants are pure value replacement: the
//! holder ([`crate::executor::Executor`]) builds a new `ExecutorState` and
//! publishes it with a single atomic pointer swap; nothing here mutates a
//! published state in place.

use crate::types::BrokerId;

/// Which of the three ordered movement phases an in-progress execution is
/// currently driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    InterBroker,
    IntraBroker,
    Leader,
}

/// Min/max/avg snapshot of a concurrency dimension's per-broker caps, as
/// returned by [`crate::concurrency_manager::ConcurrencyManager::get_execution_concurrency_summary`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConcurrencySummary {
    pub min: u32,
    pub max: u32,
    pub avg: f64,
}

/// Remaining/finished task counts, by task type and by data-size, as
/// tracked by [`crate::task_tracker::TaskTracker`]. Leader tasks move no
/// replica data, so their contribution to every `*_bytes` field is always 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TasksSummary {
    pub remaining_inter_broker: usize,
    pub remaining_intra_broker: usize,
    pub remaining_leader: usize,
    pub finished_inter_broker: usize,
    pub finished_intra_broker: usize,
    pub finished_leader: usize,
    pub remaining_inter_broker_bytes: u64,
    pub remaining_intra_broker_bytes: u64,
    pub finished_inter_broker_bytes: u64,
    pub finished_intra_broker_bytes: u64,
}

/// Fields common to every phase once an execution has been admitted past
/// `NoTask`. Earlier phases leave the in-progress-only fields at their
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ExecutorStatePayload {
    pub uuid: String,
    /// Evaluated once, at the moment the transition into this state
    /// committed (see the "supplier of reason" pattern in
    /// [`crate::executor::Executor::execute_proposals`]).
    pub reason: String,
    pub started_at_ms: u64,
    pub triggered_by_user: bool,
    pub recently_demoted: Vec<BrokerId>,
    pub recently_removed: Vec<BrokerId>,
    pub tasks_summary: TasksSummary,
    pub concurrency_summary: Vec<(Phase, ConcurrencySummary)>,
}

/// Top-level lifecycle state of the executor. See spec §3 for the full
/// invariant list; the headline ones are:
/// - at most one execution in flight per [`crate::executor::Executor`];
/// - `Starting` may only be entered from `GeneratingProposals` with a
///   matching `uuid`;
/// - once `Stopping`, no new tasks are admitted and every in-progress task
///   is driven to `Dead`.
#[derive(Debug, Clone)]
pub enum ExecutorState {
    NoTask,
    GeneratingProposals(ExecutorStatePayload),
    Starting(ExecutorStatePayload),
    InterBrokerInProgress(ExecutorStatePayload),
    IntraBrokerInProgress(ExecutorStatePayload),
    LeaderInProgress(ExecutorStatePayload),
    Stopping(ExecutorStatePayload),
}

impl ExecutorState {
    pub fn payload(&self) -> Option<&ExecutorStatePayload> {
        match self {
            ExecutorState::NoTask => None,
            ExecutorState::GeneratingProposals(p)
            | ExecutorState::Starting(p)
            | ExecutorState::InterBrokerInProgress(p)
            | ExecutorState::IntraBrokerInProgress(p)
            | ExecutorState::LeaderInProgress(p)
            | ExecutorState::Stopping(p) => Some(p),
        }
    }

    pub fn uuid(&self) -> Option<&str> {
        self.payload().map(|p| p.uuid.as_str())
    }

    pub fn is_no_task(&self) -> bool {
        matches!(self, ExecutorState::NoTask)
    }

    pub fn is_generating_proposals(&self) -> bool {
        matches!(self, ExecutorState::GeneratingProposals(_))
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, ExecutorState::Stopping(_))
    }

    /// The [`Phase`] this state corresponds to, if any (only the
    /// `*InProgress` variants correspond to a phase).
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ExecutorState::InterBrokerInProgress(_) => Some(Phase::InterBroker),
            ExecutorState::IntraBrokerInProgress(_) => Some(Phase::IntraBroker),
            ExecutorState::LeaderInProgress(_) => Some(Phase::Leader),
            _ => None,
        }
    }

    pub fn for_phase(phase: Phase, payload: ExecutorStatePayload) -> Self {
        match phase {
            Phase::InterBroker => ExecutorState::InterBrokerInProgress(payload),
            Phase::IntraBroker => ExecutorState::IntraBrokerInProgress(payload),
            Phase::Leader => ExecutorState::LeaderInProgress(payload),
        }
    }
}

//! Keeps replication-throttle rates on the admin interface in sync with the
//! brokers actually participating in in-flight inter-broker moves (C8).
//!
//! Only brokers that are a source or destination of a currently in-progress
//! inter-broker task should carry a throttle; everyone else should have it
//! cleared. Each call to [`ThrottleHelper::reconcile`] diffs the desired set
//! against what was last applied and issues the minimal set of
//! `set_replication_throttle` calls to converge, rather than re-setting
//! every broker on every tick.

#[cfg(test)]
#[path = "throttle_test.rs"]
mod throttle_test;

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, instrument};

use crate::types::{AdminInterface, AdminInterfaceError, BrokerId, ExecutionTask};

#[derive(Debug, Default)]
struct ThrottleState {
    throttled: HashSet<BrokerId>,
}

/// Tracks which brokers currently carry a replication throttle and
/// reconciles that set against the brokers touched by in-progress
/// inter-broker tasks.
pub struct ThrottleHelper {
    bytes_per_sec: u64,
    state: Mutex<ThrottleState>,
}

impl ThrottleHelper {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self { bytes_per_sec, state: Mutex::new(ThrottleState::default()) }
    }

    /// Compute the brokers that should be throttled given the current
    /// in-progress inter-broker task set: every broker appearing in either
    /// a task's old or new replica list.
    fn desired_brokers(in_progress: &[&ExecutionTask]) -> HashSet<BrokerId> {
        let mut set = HashSet::new();
        for task in in_progress {
            set.extend(task.affected_brokers());
        }
        set
    }

    /// Applies the minimal set of throttle/clear calls to converge on
    /// `desired_brokers(in_progress)`.
    #[instrument(skip_all)]
    pub async fn reconcile(
        &self,
        in_progress: &[&ExecutionTask],
        admin: &dyn AdminInterface,
    ) -> Result<(), AdminInterfaceError> {
        let desired = Self::desired_brokers(in_progress);
        let (to_set, to_clear) = {
            let state = self.state.lock().expect("throttle state lock poisoned");
            let to_set: Vec<BrokerId> = desired.difference(&state.throttled).copied().collect();
            let to_clear: Vec<BrokerId> = state.throttled.difference(&desired).copied().collect();
            (to_set, to_clear)
        };

        if !to_set.is_empty() {
            debug!(brokers = ?to_set, bytes_per_sec = self.bytes_per_sec, "applying replication throttle");
            admin.set_replication_throttle(to_set, Some(self.bytes_per_sec)).await?;
        }
        if !to_clear.is_empty() {
            debug!(brokers = ?to_clear, "clearing replication throttle");
            admin.set_replication_throttle(to_clear, None).await?;
        }

        let mut state = self.state.lock().expect("throttle state lock poisoned");
        state.throttled = desired;
        Ok(())
    }

    /// Clears every currently-throttled broker; called once an execution
    /// finishes or is cancelled.
    pub async fn clear_all(&self, admin: &dyn AdminInterface) -> Result<(), AdminInterfaceError> {
        let throttled: Vec<BrokerId> = {
            let state = self.state.lock().expect("throttle state lock poisoned");
            state.throttled.iter().copied().collect()
        };
        if !throttled.is_empty() {
            admin.set_replication_throttle(throttled, None).await?;
        }
        self.state.lock().expect("throttle state lock poisoned").throttled.clear();
        Ok(())
    }
}

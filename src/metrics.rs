//! Metrics emitted by the execution core, via the `metrics` facade crate
//! (a real, published dependency, unlike the teacher's workspace-internal
//! `apollo_metrics` macro crate — see DESIGN.md).

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions once, mirroring
/// `apollo_consensus::metrics::register_metrics`. Safe to call more than
/// once; `describe_*` is idempotent in every `metrics` exporter.
pub fn register_metrics() {
    describe_gauge!(
        "execution_core_in_progress_tasks",
        "Number of tasks currently IN_PROGRESS or ABORTING, by task type"
    );
    describe_gauge!(
        "execution_core_concurrency_cap_min",
        "Minimum per-broker concurrency cap currently in effect, by dimension"
    );
    describe_gauge!(
        "execution_core_concurrency_cap_max",
        "Maximum per-broker concurrency cap currently in effect, by dimension"
    );
    describe_gauge!(
        "execution_core_concurrency_cap_avg",
        "Average per-broker concurrency cap currently in effect, by dimension"
    );
    describe_counter!(
        "execution_core_stopped_by_user_total",
        "Number of executions stopped via an explicit user request"
    );
    describe_counter!(
        "execution_core_stopped_by_system_total",
        "Number of executions stopped by the system (e.g. concurrency adjuster)"
    );
    describe_counter!(
        "execution_core_tasks_completed_total",
        "Number of tasks that reached COMPLETED, by task type"
    );
    describe_counter!("execution_core_tasks_dead_total", "Number of tasks that reached DEAD, by task type");
    describe_counter!("execution_core_slow_task_alerts_total", "Number of slow-task alerts sent");
    describe_counter!(
        "execution_core_reexecutions_total",
        "Number of tasks re-submitted after a controller-failover race"
    );
    describe_counter!("execution_core_rollbacks_total", "Number of rollback cancellations submitted");
}

pub fn set_in_progress_tasks(task_type: &'static str, count: u64) {
    gauge!("execution_core_in_progress_tasks", "task_type" => task_type).set(count as f64);
}

pub fn set_concurrency_cap_summary(dimension: &'static str, min: u32, max: u32, avg: f64) {
    gauge!("execution_core_concurrency_cap_min", "dimension" => dimension).set(min as f64);
    gauge!("execution_core_concurrency_cap_max", "dimension" => dimension).set(max as f64);
    gauge!("execution_core_concurrency_cap_avg", "dimension" => dimension).set(avg);
}

pub fn incr_stopped_by_user() {
    counter!("execution_core_stopped_by_user_total").increment(1);
}

pub fn incr_stopped_by_system() {
    counter!("execution_core_stopped_by_system_total").increment(1);
}

pub fn incr_tasks_completed(task_type: &'static str) {
    counter!("execution_core_tasks_completed_total", "task_type" => task_type).increment(1);
}

pub fn incr_tasks_dead(task_type: &'static str) {
    counter!("execution_core_tasks_dead_total", "task_type" => task_type).increment(1);
}

pub fn incr_slow_task_alerts() {
    counter!("execution_core_slow_task_alerts_total").increment(1);
}

pub fn incr_reexecutions(count: u64) {
    counter!("execution_core_reexecutions_total").increment(count);
}

pub fn incr_rollbacks(count: u64) {
    counter!("execution_core_rollbacks_total").increment(count);
}

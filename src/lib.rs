#![warn(missing_docs)]
//! Execution core for a partitioned, replicated log system's cluster
//! rebalancer.
//!
//! Given a batch of execution proposals — each describing a change to a
//! partition's replica set, a per-broker disk placement, or its preferred
//! leader — this crate drives those proposals to completion against the
//! cluster's admin interface, enforcing concurrency caps, responding to
//! cluster health, and providing safe start/stop/recovery semantics.
//!
//! [`executor::Executor`] is the top-level entry point: it accepts a batch
//! of proposals via [`executor::Executor::execute_proposals`], primes the
//! task tracker and concurrency manager, and runs the three-phase execution
//! loop (inter-broker replica moves, then intra-broker disk moves, then
//! leader elections) on a dedicated worker.
//!
//! This crate does not generate or optimize proposals, does not expose a
//! REST/CLI surface, and does not persist history to disk — all of that is
//! out of scope; see `SPEC_FULL.md` for the full boundary.

pub mod concurrency_adjuster;
pub mod concurrency_manager;
pub mod config;
pub mod executor;
pub mod execution_loop;
pub mod history;
pub mod metrics;
pub mod min_isr_cache;
pub mod phase;
pub mod task_tracker;
#[allow(missing_docs)]
pub mod throttle;
#[allow(missing_docs)]
pub mod types;

#[cfg(test)]
#[allow(missing_docs)]
pub(crate) mod test_utils;

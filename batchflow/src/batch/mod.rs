//! Batch job lifecycle and the pool that drives it.
//!
//! A [`BatchJob`] is a descriptor holding a closed set of lifecycle callbacks
//! (`set_up` → `execute` → `tear_down`); [`BatchPool`] drives the state
//! machine for every job in a batch and isolates failures per job.

mod job;
mod pool;

pub use job::{BatchJob, JobContext, JobOutcome, JobState};
pub use pool::{BatchOptions, BatchPool, BatchReport, BatchStopFlag};

//! # Batchflow
//!
//! A concurrent batch execution framework with ambient-context propagation
//! and pessimistic write coordination.
//!
//! Batchflow runs batches of jobs on worker tasks while faithfully carrying
//! the identity and diagnostic context of the submitter across the thread
//! boundary:
//!
//! - **Context propagation**: Immutable [`context::ContextSnapshot`]s captured
//!   on the submitting side and replicated onto the executing worker
//! - **Scoped diagnostics**: [`context::DiagnosticScope`] overwrites one
//!   diagnostic tag for the duration of a unit of work and restores the prior
//!   value on every exit path
//! - **Batch job lifecycle**: `set_up` → `execute` → `tear_down`, driven by
//!   [`batch::BatchPool`] with per-job failure isolation
//! - **Pessimistic record locks**: [`lock::RecordLockRegistry`] serializes
//!   concurrent mutation of shared records with a bounded-wait acquire
//! - **Load-generation driver**: [`driver::BatchDriver`] exercises the above
//!   under configurable concurrency and pacing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batchflow::prelude::*;
//!
//! let snapshot = ContextSnapshot::capture(&ambient);
//! let job = BatchJob::context_aware("calculate", snapshot, |ctx| async move {
//!     // runs with the submitter's identity on the worker
//!     Ok(())
//! });
//!
//! let report = BatchPool::new(8).process(vec![job]).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
pub mod context;
pub mod driver;
pub mod errors;
pub mod lock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batch::{
        BatchJob, BatchOptions, BatchPool, BatchReport, BatchStopFlag, JobContext, JobOutcome,
        JobState,
    };
    pub use crate::context::{
        AmbientContext, ContextReplicator, ContextSnapshot, DiagnosticContext, DiagnosticScope,
    };
    pub use crate::driver::{
        BatchDriver, BatchFactory, DriverState, MeasurementStats, RunConfiguration, RunSummary,
        WorkerContext,
    };
    pub use crate::errors::{
        BatchflowError, ConfigurationError, JobError, JobErrorKind, LockTimeoutError,
    };
    pub use crate::lock::{RecordLockGuard, RecordLockRegistry, DEFAULT_LOCK_TIMEOUT};
}

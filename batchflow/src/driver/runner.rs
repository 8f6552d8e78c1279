//! The load-generation driver: worker loops, pacing and run aggregation.

use crate::batch::{BatchJob, BatchPool, BatchReport};
use crate::context::{AmbientContext, ContextSnapshot, DiagnosticScope};
use crate::driver::RunConfiguration;
use crate::errors::{BatchflowError, JobErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The run-level state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    /// Not started.
    #[default]
    Idle,
    /// Worker loops are running.
    Running,
    /// All worker loops exited normally.
    Completed,
    /// The run never started (invalid configuration).
    Aborted,
}

/// Everything a factory needs to build one batch for one worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// The worker loop index, `0..thread_count`.
    pub worker_index: usize,
    /// The batch number within this worker, starting at zero.
    pub batch_number: u64,
    /// The worker's context snapshot, captured once at loop start.
    pub snapshot: ContextSnapshot,
    /// The run configuration.
    pub config: Arc<RunConfiguration>,
}

/// Builds the jobs of one batch.
///
/// The factory is the seam between the driver loop and the workload: the
/// load-generation binary builds HTTP jobs here, tests build synthetic ones.
/// Building may itself perform I/O (e.g. fetching an authorization token once
/// per batch).
#[async_trait]
pub trait BatchFactory: Send + Sync {
    /// Builds the jobs for the batch described by `ctx`.
    async fn build_batch(&self, ctx: &WorkerContext) -> Result<Vec<BatchJob>, BatchflowError>;
}

/// The merged outcome of one driver run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// When the run entered `Running`.
    pub started_at: DateTime<Utc>,
    /// When the last worker loop exited.
    pub finished_at: Option<DateTime<Utc>>,
    /// Jobs whose lifecycle was started.
    pub attempted: usize,
    /// Jobs that completed without error.
    pub succeeded: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs skipped by a raised stop flag.
    pub skipped: usize,
    /// Batches processed across all workers.
    pub batches: usize,
    /// Batches whose construction failed before any job started.
    pub batch_build_failures: usize,
    /// Worker loops that panicked.
    pub worker_panics: usize,
    /// Failure counts by kind.
    pub failure_kinds: HashMap<JobErrorKind, usize>,
    /// Sum of job latencies.
    pub total_latency: Duration,
    /// Largest single-job latency.
    pub max_latency: Duration,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    /// Creates an empty summary stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            batches: 0,
            batch_build_failures: 0,
            worker_panics: 0,
            failure_kinds: HashMap::new(),
            total_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
        }
    }

    /// Folds one batch report into the summary.
    pub fn record_batch(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.attempted += report.attempted;
        self.succeeded += report.succeeded;
        self.failed += report.failed;
        self.skipped += report.skipped;
        for (kind, count) in &report.failure_kinds {
            *self.failure_kinds.entry(*kind).or_insert(0) += count;
        }
        for outcome in &report.outcomes {
            self.total_latency += outcome.latency;
            self.max_latency = self.max_latency.max(outcome.latency);
        }
    }

    /// Folds another worker's summary into this one.
    pub fn merge(&mut self, other: &RunSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.batches += other.batches;
        self.batch_build_failures += other.batch_build_failures;
        self.worker_panics += other.worker_panics;
        for (kind, count) in &other.failure_kinds {
            *self.failure_kinds.entry(*kind).or_insert(0) += count;
        }
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
    }

    /// Returns the average job latency, zero when nothing ran.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        if self.attempted == 0 {
            return Duration::ZERO;
        }
        self.total_latency / u32::try_from(self.attempted).unwrap_or(u32::MAX)
    }

    /// Converts to a dictionary representation for reporting.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("attempted".to_string(), serde_json::json!(self.attempted));
        map.insert("succeeded".to_string(), serde_json::json!(self.succeeded));
        map.insert("failed".to_string(), serde_json::json!(self.failed));
        map.insert("skipped".to_string(), serde_json::json!(self.skipped));
        map.insert("batches".to_string(), serde_json::json!(self.batches));
        map.insert(
            "batch_build_failures".to_string(),
            serde_json::json!(self.batch_build_failures),
        );
        map.insert(
            "worker_panics".to_string(),
            serde_json::json!(self.worker_panics),
        );
        let kinds: HashMap<&str, usize> = self
            .failure_kinds
            .iter()
            .map(|(kind, count)| (kind.name(), *count))
            .collect();
        map.insert("failure_kinds".to_string(), serde_json::json!(kinds));
        map.insert(
            "average_latency_ms".to_string(),
            serde_json::json!(self.average_latency().as_millis()),
        );
        map.insert(
            "max_latency_ms".to_string(),
            serde_json::json!(self.max_latency.as_millis()),
        );
        map
    }
}

/// Orchestrates a load-generation run.
///
/// Spawns `thread_count` independent worker loops, each repeatedly executing
/// batches of `batch_size` jobs until the wall-clock deadline. The deadline
/// is checked only between batches, never mid-batch: in-flight work always
/// runs to completion and the next batch is simply not started.
pub struct BatchDriver {
    config: Arc<RunConfiguration>,
    factory: Arc<dyn BatchFactory>,
    state: RwLock<DriverState>,
}

impl BatchDriver {
    /// Creates a driver for the given configuration and job factory.
    #[must_use]
    pub fn new(config: RunConfiguration, factory: Arc<dyn BatchFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            state: RwLock::new(DriverState::Idle),
        }
    }

    /// Returns the current driver state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        *self.state.read()
    }

    /// Runs to completion and returns the merged summary.
    ///
    /// # Errors
    ///
    /// Returns [`BatchflowError::Configuration`] when validation fails; no
    /// worker is started in that case.
    pub async fn run(&self) -> Result<RunSummary, BatchflowError> {
        if let Err(err) = self.config.validate() {
            *self.state.write() = DriverState::Aborted;
            return Err(err.into());
        }
        *self.state.write() = DriverState::Running;

        info!(
            thread_count = self.config.thread_count,
            batch_size = self.config.batch_size,
            duration_mins = self.config.duration_mins,
            pause_seconds = self.config.pause_seconds,
            "run started"
        );

        let start = tokio::time::Instant::now();
        let mut summary = RunSummary::new();

        let mut handles = Vec::with_capacity(self.config.thread_count);
        for worker_index in 0..self.config.thread_count {
            let config = self.config.clone();
            let factory = self.factory.clone();
            handles.push(tokio::spawn(worker_loop(
                worker_index,
                config,
                factory,
                start,
            )));
        }

        for handle in handles {
            match handle.await {
                Ok(worker_summary) => summary.merge(&worker_summary),
                Err(join_error) => {
                    error!(error = %join_error, "worker loop panicked");
                    summary.worker_panics += 1;
                }
            }
        }

        summary.finished_at = Some(Utc::now());
        *self.state.write() = DriverState::Completed;

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            batches = summary.batches,
            "run finished"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// One worker loop.
///
/// Captures the worker's snapshot once, then alternates batches and pauses
/// until the deadline. A `duration_mins` of zero runs exactly one batch.
async fn worker_loop(
    worker_index: usize,
    config: Arc<RunConfiguration>,
    factory: Arc<dyn BatchFactory>,
    start: tokio::time::Instant,
) -> RunSummary {
    let ambient = Arc::new(AmbientContext::new());
    ambient.set_identity(format!("worker-{worker_index}"));
    ambient.set_source("batch-driver");
    ambient.diagnostics().put("worker", worker_index.to_string());
    let snapshot = ContextSnapshot::capture(&ambient);

    let pool = BatchPool::new(config.thread_count);
    let deadline = config.deadline();
    let mut summary = RunSummary::new();
    let mut batch_number: u64 = 0;

    loop {
        // Deadline policy: checked before a batch starts, never mid-batch.
        if deadline.is_zero() {
            if batch_number >= 1 {
                break;
            }
        } else if start.elapsed() >= deadline {
            debug!(worker = worker_index, "deadline reached");
            break;
        }

        let _batch_scope = DiagnosticScope::enter_with_suffix(
            ambient.diagnostics().clone(),
            "batch",
            "processing",
            batch_number.to_string(),
        );
        debug!(worker = worker_index, batch = batch_number, "starting batch");

        let worker_ctx = WorkerContext {
            worker_index,
            batch_number,
            snapshot: snapshot.clone(),
            config: config.clone(),
        };

        match factory.build_batch(&worker_ctx).await {
            Ok(jobs) => {
                let report = pool.process(jobs).await;
                summary.record_batch(&report);
            }
            Err(err) => {
                // A batch that cannot even be built is recorded and the
                // loop continues; the next attempt may succeed.
                warn!(worker = worker_index, batch = batch_number, error = %err, "batch construction failed");
                summary.batch_build_failures += 1;
            }
        }

        batch_number += 1;

        if !deadline.is_zero() && !config.pause().is_zero() {
            info!(
                worker = worker_index,
                "waiting {} seconds...", config.pause_seconds
            );
            tokio::time::sleep(config.pause()).await;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::JobError;

    struct NoOpFactory;

    #[async_trait]
    impl BatchFactory for NoOpFactory {
        async fn build_batch(
            &self,
            ctx: &WorkerContext,
        ) -> Result<Vec<BatchJob>, BatchflowError> {
            Ok((0..ctx.config.batch_size)
                .map(|i| BatchJob::new(format!("noop-{i}"), |_ctx| async { Ok(()) }))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_invalid_configuration_aborts_before_workers_start() {
        let config = RunConfiguration::default().with_thread_count(0);
        let driver = BatchDriver::new(config, Arc::new(NoOpFactory));

        let err = driver.run().await.unwrap_err();
        assert!(matches!(err, BatchflowError::Configuration(_)));
        assert_eq!(driver.state(), DriverState::Aborted);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let config = RunConfiguration::default()
            .with_thread_count(1)
            .with_batch_size(1)
            .with_duration_mins(0);
        let driver = BatchDriver::new(config, Arc::new(NoOpFactory));

        assert_eq!(driver.state(), DriverState::Idle);
        driver.run().await.unwrap();
        assert_eq!(driver.state(), DriverState::Completed);
    }

    #[tokio::test]
    async fn test_build_failure_does_not_kill_the_worker() {
        struct FailingFactory;

        #[async_trait]
        impl BatchFactory for FailingFactory {
            async fn build_batch(
                &self,
                _ctx: &WorkerContext,
            ) -> Result<Vec<BatchJob>, BatchflowError> {
                Err(JobError::execution("token fetch failed").into())
            }
        }

        let config = RunConfiguration::default()
            .with_thread_count(2)
            .with_batch_size(5)
            .with_duration_mins(0);
        let driver = BatchDriver::new(config, Arc::new(FailingFactory));

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.batch_build_failures, 2);
        assert_eq!(driver.state(), DriverState::Completed);
    }

    #[test]
    fn test_summary_merge() {
        let mut a = RunSummary::new();
        a.attempted = 10;
        a.succeeded = 8;
        a.failed = 2;
        a.failure_kinds.insert(JobErrorKind::Execution, 2);
        a.max_latency = Duration::from_millis(50);

        let mut b = RunSummary::new();
        b.attempted = 5;
        b.succeeded = 5;
        b.max_latency = Duration::from_millis(80);

        a.merge(&b);
        assert_eq!(a.attempted, 15);
        assert_eq!(a.succeeded, 13);
        assert_eq!(a.failed, 2);
        assert_eq!(a.max_latency, Duration::from_millis(80));
        assert_eq!(a.failure_kinds.get(&JobErrorKind::Execution), Some(&2));
    }

    #[test]
    fn test_summary_to_dict_reports_counts_not_raw_errors() {
        let mut summary = RunSummary::new();
        summary.attempted = 3;
        summary.failed = 1;
        summary.failure_kinds.insert(JobErrorKind::LockTimeout, 1);

        let dict = summary.to_dict();
        assert_eq!(dict.get("attempted").unwrap(), &serde_json::json!(3));
        assert_eq!(
            dict.get("failure_kinds").unwrap(),
            &serde_json::json!({"lock_timeout": 1})
        );
    }
}

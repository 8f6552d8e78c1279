//! Bounded-concurrency execution of one batch of jobs.

use super::job::{BatchJob, JobContext, JobOutcome, JobState};
use crate::errors::{JobError, JobErrorKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// A latch raised when a job failure is classified fatal.
///
/// Once raised, jobs not yet submitted are skipped; already-running jobs
/// complete.
#[derive(Debug, Clone, Default)]
pub struct BatchStopFlag {
    raised: Arc<AtomicBool>,
}

impl BatchStopFlag {
    /// Creates a new, unraised flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Returns true if the flag has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Options for one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Run the first job synchronously before fanning out, as a
    /// connectivity probe.
    pub run_first_synchronously: bool,
    /// Log progress every N completed jobs.
    pub report_every: Option<usize>,
    /// Optional name used in progress log lines.
    pub name: Option<String>,
}

impl BatchOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the synchronous first-job probe.
    #[must_use]
    pub fn with_first_job_probe(mut self) -> Self {
        self.run_first_synchronously = true;
        self
    }

    /// Enables progress reporting every `n` completed jobs.
    #[must_use]
    pub fn with_report_every(mut self, n: usize) -> Self {
        self.report_every = Some(n);
        self
    }

    /// Names the batch for progress reporting.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Aggregated outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Jobs whose lifecycle was started.
    pub attempted: usize,
    /// Jobs that completed without error.
    pub succeeded: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs skipped because the stop flag was raised before submission.
    pub skipped: usize,
    /// Failure counts by kind.
    pub failure_kinds: HashMap<JobErrorKind, usize>,
    /// Per-job outcomes in completion-collection order.
    pub outcomes: Vec<JobOutcome>,
    /// Whether a fatal failure stopped the batch.
    pub fatal: bool,
}

impl BatchReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one job outcome.
    pub fn record(&mut self, outcome: JobOutcome) {
        self.attempted += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if let Some(kind) = outcome.error_kind() {
                *self.failure_kinds.entry(kind).or_insert(0) += 1;
            }
        }
        if outcome.fatal {
            self.fatal = true;
        }
        self.outcomes.push(outcome);
    }

    /// Returns the fraction of attempted jobs that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.succeeded as f64 / self.attempted as f64
        }
    }
}

/// Executes batches of [`BatchJob`]s with bounded parallelism.
///
/// The pool drives each job's lifecycle in order, isolates one job's failure
/// from its siblings, and waits for full-batch completion before returning.
#[derive(Debug, Clone)]
pub struct BatchPool {
    concurrency: usize,
}

impl BatchPool {
    /// Creates a pool that runs at most `concurrency` jobs at once.
    ///
    /// A concurrency of zero is coerced to one.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Returns the configured concurrency bound.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes a batch with default options.
    pub async fn process(&self, jobs: Vec<BatchJob>) -> BatchReport {
        self.process_with_options(jobs, BatchOptions::default()).await
    }

    /// Processes a batch, blocking until every submitted job completed.
    ///
    /// A single job's failure is recorded in the report and the batch
    /// continues; only a failure classified fatal by its own job stops
    /// submission of the remaining jobs.
    pub async fn process_with_options(
        &self,
        jobs: Vec<BatchJob>,
        options: BatchOptions,
    ) -> BatchReport {
        let mut report = BatchReport::new();
        if jobs.is_empty() {
            return report;
        }

        info!(
            jobs = jobs.len(),
            concurrency = self.concurrency,
            "processing batch"
        );

        let total = jobs.len();
        let mut jobs = jobs.into_iter().enumerate();
        let stop = BatchStopFlag::new();

        if options.run_first_synchronously {
            if let Some((index, first)) = jobs.next() {
                let outcome = run_job(first, index).await;
                if outcome.fatal {
                    stop.raise();
                }
                report.record(outcome);
                if stop.is_raised() {
                    warn!("first job failed fatally, skipping the rest of the batch");
                    report.skipped = total - report.attempted;
                    return report;
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        for (index, job) in jobs {
            if stop.is_raised() {
                info!("stop flag raised, skipping remaining jobs");
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                // The semaphore is never closed while the pool is alive.
                break;
            };

            let stop = stop.clone();
            let completed = completed.clone();
            let report_every = options.report_every;
            let name = options.name.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = run_job(job, index).await;
                if outcome.fatal {
                    stop.raise();
                }

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(every) = report_every {
                    if every > 0 && done % every == 0 {
                        info!(
                            name = name.as_deref().unwrap_or("batch"),
                            completed = done,
                            "progress"
                        );
                    }
                }
                outcome
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(outcome) => report.record(outcome),
                Err(join_error) => {
                    // A panicked job is a failure of that job only.
                    error!(error = %join_error, "job task panicked");
                    report.record(JobOutcome {
                        job_id: uuid::Uuid::new_v4(),
                        name: "unknown".to_string(),
                        state: JobState::Failed,
                        error: Some(JobError::execution(format!(
                            "job task panicked: {join_error}"
                        ))),
                        latency: Duration::ZERO,
                        fatal: false,
                    });
                }
            }
        }

        report.skipped = total - report.attempted;
        debug!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "batch done"
        );
        report
    }
}

/// Drives one job through its lifecycle.
///
/// `execute` never runs unless `set_up` completed without error; `tear_down`
/// runs exactly once regardless of how the earlier phases ended.
async fn run_job(job: BatchJob, index: usize) -> JobOutcome {
    let ctx = Arc::new(JobContext::new(index));
    let started = tokio::time::Instant::now();

    debug!(job = %job.name(), id = %ctx.job_id(), state = %JobState::SettingUp, "job lifecycle");
    let mut result = Ok(());
    if let Some(set_up) = job.set_up_fn() {
        // Any error out of set_up is a setup failure, whatever its shape.
        result = set_up(ctx.clone()).await.map_err(|err| match err {
            setup @ JobError::Setup(_) => setup,
            other => JobError::setup(other.to_string()),
        });
    }

    if result.is_ok() {
        debug!(job = %job.name(), id = %ctx.job_id(), state = %JobState::Executing, "job lifecycle");
        result = (job.execute_fn())(ctx.clone()).await;
    }

    debug!(job = %job.name(), id = %ctx.job_id(), state = %JobState::TearingDown, "job lifecycle");
    if let Some(tear_down) = job.tear_down_fn() {
        tear_down(ctx.clone()).await;
    }

    let latency = started.elapsed();
    match result {
        Ok(()) => JobOutcome {
            job_id: ctx.job_id(),
            name: job.name().to_string(),
            state: JobState::Completed,
            error: None,
            latency,
            fatal: false,
        },
        Err(error) => {
            let fatal = job.is_fatal(&error);
            warn!(job = %job.name(), id = %ctx.job_id(), error = %error, fatal, "job failed");
            JobOutcome {
                job_id: ctx.job_id(),
                name: job.name().to_string(),
                state: JobState::Failed,
                error: Some(error),
                latency,
                fatal,
            }
        }
    }
}

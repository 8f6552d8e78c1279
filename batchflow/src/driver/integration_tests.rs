//! End-to-end driver tests with synthetic batch factories.

use crate::batch::BatchJob;
use crate::context::ContextSnapshot;
use crate::driver::{BatchDriver, BatchFactory, RunConfiguration, WorkerContext};
use crate::errors::{BatchflowError, JobError, JobErrorKind};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builds `batch_size` jobs that count their executions.
struct CountingFactory {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl BatchFactory for CountingFactory {
    async fn build_batch(&self, ctx: &WorkerContext) -> Result<Vec<BatchJob>, BatchflowError> {
        let jobs = (0..ctx.config.batch_size)
            .map(|i| {
                let executions = self.executions.clone();
                BatchJob::new(format!("count-{i}"), move |_ctx| {
                    let executions = executions.clone();
                    async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .collect();
        Ok(jobs)
    }
}

#[tokio::test]
async fn test_zero_duration_runs_exactly_one_batch_per_worker() {
    let executions = Arc::new(AtomicUsize::new(0));
    let config = RunConfiguration::default()
        .with_thread_count(4)
        .with_batch_size(10)
        .with_duration_mins(0);
    let driver = BatchDriver::new(
        config,
        Arc::new(CountingFactory {
            executions: executions.clone(),
        }),
    );

    let summary = driver.run().await.unwrap();

    assert_eq!(summary.batches, 4);
    assert_eq!(summary.attempted, 40);
    assert_eq!(summary.succeeded, 40);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.worker_panics, 0);
    assert_eq!(executions.load(Ordering::SeqCst), 40);
}

/// Builds jobs whose execution takes simulated wall-clock time, so the
/// number of batches that fit in the deadline is exact under a paused clock.
struct SlowFactory {
    job_duration: Duration,
}

#[async_trait]
impl BatchFactory for SlowFactory {
    async fn build_batch(&self, ctx: &WorkerContext) -> Result<Vec<BatchJob>, BatchflowError> {
        let job_duration = self.job_duration;
        let jobs = (0..ctx.config.batch_size)
            .map(|i| {
                BatchJob::new(format!("slow-{i}"), move |_ctx| async move {
                    tokio::time::sleep(job_duration).await;
                    Ok(())
                })
            })
            .collect();
        Ok(jobs)
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_checked_between_batches_only() {
    // Two workers, pool concurrency 2, five 10-second jobs per batch: each
    // batch takes three waves of 10 seconds. Within a 60-second deadline a
    // worker fits exactly two batches (checks at 0s, 30s pass; 60s fails),
    // and the second batch runs to completion past nothing.
    let config = RunConfiguration::default()
        .with_thread_count(2)
        .with_batch_size(5)
        .with_duration_mins(1)
        .with_pause_seconds(0);
    let driver = BatchDriver::new(
        config,
        Arc::new(SlowFactory {
            job_duration: Duration::from_secs(10),
        }),
    );

    let summary = driver.run().await.unwrap();

    assert_eq!(summary.batches, 4);
    assert_eq!(summary.attempted, 20);
    assert_eq!(summary.succeeded, 20);
}

/// Fails every third call, counting both totals itself so the summary can be
/// checked against the stub's own bookkeeping.
struct EveryThirdFails {
    calls: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl BatchFactory for EveryThirdFails {
    async fn build_batch(&self, ctx: &WorkerContext) -> Result<Vec<BatchJob>, BatchflowError> {
        let jobs = (0..ctx.config.batch_size)
            .map(|i| {
                let calls = self.calls.clone();
                let failures = self.failures.clone();
                BatchJob::new(format!("flaky-{i}"), move |_ctx| {
                    let calls = calls.clone();
                    let failures = failures.clone();
                    async move {
                        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if call % 3 == 0 {
                            failures.fetch_add(1, Ordering::SeqCst);
                            Err(JobError::execution(format!("injected failure on call {call}")))
                        } else {
                            Ok(())
                        }
                    }
                })
            })
            .collect();
        Ok(jobs)
    }
}

#[tokio::test]
async fn test_failures_are_counted_and_isolated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let config = RunConfiguration::default()
        .with_thread_count(1)
        .with_batch_size(20)
        .with_duration_mins(0);
    let driver = BatchDriver::new(
        config,
        Arc::new(EveryThirdFails {
            calls: calls.clone(),
            failures: failures.clone(),
        }),
    );

    let summary = driver.run().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 20);
    assert_eq!(summary.attempted, 20);
    assert_eq!(summary.failed, failures.load(Ordering::SeqCst));
    assert_eq!(summary.failed, 6);
    assert_eq!(summary.succeeded, 14);
    assert_eq!(summary.failure_kinds.get(&JobErrorKind::Execution), Some(&6));
    assert_eq!(summary.worker_panics, 0);
}

/// Builds context-aware jobs from the worker snapshot and records the
/// identity each job observes.
struct SnapshotObservingFactory {
    observed: Arc<parking_lot::Mutex<Vec<String>>>,
}

#[async_trait]
impl BatchFactory for SnapshotObservingFactory {
    async fn build_batch(&self, ctx: &WorkerContext) -> Result<Vec<BatchJob>, BatchflowError> {
        let snapshot: ContextSnapshot = ctx.snapshot.clone();
        let jobs = (0..ctx.config.batch_size)
            .map(|i| {
                let observed = self.observed.clone();
                BatchJob::context_aware(format!("observe-{i}"), snapshot.clone(), move |job_ctx| {
                    let observed = observed.clone();
                    async move {
                        observed.lock().push(job_ctx.ambient().identity());
                        Ok(())
                    }
                })
            })
            .collect();
        Ok(jobs)
    }
}

#[tokio::test]
async fn test_jobs_observe_their_workers_identity() {
    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let config = RunConfiguration::default()
        .with_thread_count(2)
        .with_batch_size(3)
        .with_duration_mins(0);
    let driver = BatchDriver::new(
        config,
        Arc::new(SnapshotObservingFactory {
            observed: observed.clone(),
        }),
    );

    let summary = driver.run().await.unwrap();
    assert_eq!(summary.succeeded, 6);

    let identities = observed.lock();
    let mut per_worker: HashMap<&str, usize> = HashMap::new();
    for identity in identities.iter() {
        *per_worker.entry(identity.as_str()).or_insert(0) += 1;
    }
    assert_eq!(per_worker.get("worker-0"), Some(&3));
    assert_eq!(per_worker.get("worker-1"), Some(&3));
}

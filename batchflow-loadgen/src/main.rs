//! Load-generation binary.
//!
//! Drives batches of authenticated HTTP calls against a scalable service,
//! reporting live throughput and latency while the run is in flight.

mod client;

use anyhow::{Context, Result};
use async_trait::async_trait;
use batchflow::prelude::{
    BatchDriver, BatchFactory, BatchJob, BatchflowError, JobError, MeasurementStats,
    RunConfiguration, WorkerContext,
};
use client::{AuthClient, CalculationTarget, ScalableServiceClient};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Builds one batch of calculation calls.
///
/// Authenticates once per batch; every job in the batch shares the token and
/// carries the worker's context snapshot, so service-side logs correlate back
/// to the submitting worker.
struct CalculationFactory {
    auth: AuthClient,
    target: Arc<dyn CalculationTarget>,
    stats: Arc<MeasurementStats>,
}

#[async_trait]
impl BatchFactory for CalculationFactory {
    async fn build_batch(&self, ctx: &WorkerContext) -> Result<Vec<BatchJob>, BatchflowError> {
        let token = self
            .auth
            .authenticate()
            .await
            .map_err(|err| BatchflowError::Internal(format!("authentication failed: {err}")))?;
        self.stats.set_document_count(ctx.config.batch_size);

        let jobs = (0..ctx.config.batch_size)
            .map(|i| {
                let target = self.target.clone();
                let stats = self.stats.clone();
                let token = token.clone();
                BatchJob::context_aware(
                    format!("calc-{}-{}", ctx.worker_index, i),
                    ctx.snapshot.clone(),
                    move |_job_ctx| {
                        let target = target.clone();
                        let stats = stats.clone();
                        let token = token.clone();
                        async move {
                            let process_id = Uuid::new_v4().to_string();
                            let started = tokio::time::Instant::now();
                            let result = target.long_calculation(&token, &process_id).await;
                            let elapsed = started.elapsed();
                            stats.push_exec_time_millis(
                                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                            );

                            let outcome = match result {
                                Ok(value) => {
                                    stats.increment_success_count();
                                    stats.add_to_size_metric(value.unsigned_abs());
                                    Ok(())
                                }
                                Err(err) => {
                                    stats.increment_failure_count();
                                    Err(JobError::execution(err.to_string()))
                                }
                            };
                            stats.log_progress();
                            outcome
                        }
                    },
                )
            })
            .collect();
        Ok(jobs)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RunConfiguration::from_env().context("cannot read configuration")?;
    config.validate().context("invalid configuration")?;

    // URLs fail here, before any worker starts.
    let auth = AuthClient::new(&config.auth_service_url).context("auth service URL")?;
    let target =
        ScalableServiceClient::new(&config.scalable_service_url).context("service URL")?;

    let stats = Arc::new(MeasurementStats::new("SERVICE", Some("result total")));
    let factory = Arc::new(CalculationFactory {
        auth,
        target: Arc::new(target),
        stats: stats.clone(),
    });

    let driver = BatchDriver::new(config, factory);
    let summary = driver.run().await?;

    info!(
        success = stats.success_count(),
        failure = stats.failure_count(),
        "load run finished"
    );
    let mut lines: Vec<_> = summary
        .to_dict()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    lines.sort();
    for line in lines {
        info!("{line}");
    }
    Ok(())
}

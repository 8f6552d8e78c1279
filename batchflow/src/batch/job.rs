//! Batch job descriptor and lifecycle state.

use crate::context::{AmbientContext, ContextReplicator, ContextSnapshot};
use crate::errors::{JobError, JobErrorKind};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A fallible lifecycle callback (`set_up`, `execute`).
pub type LifecycleFn =
    Box<dyn Fn(Arc<JobContext>) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// The infallible `tear_down` callback.
pub type TearDownFn = Box<dyn Fn(Arc<JobContext>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Classifies whether a job failure should stop submission of the rest of
/// the batch.
pub type FatalClassifier = Box<dyn Fn(&JobError) -> bool + Send + Sync>;

/// The lifecycle state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobState {
    /// Constructed, not yet handed to a worker.
    #[default]
    Created,
    /// `set_up` is running.
    SettingUp,
    /// `execute` is running.
    Executing,
    /// `tear_down` is running.
    TearingDown,
    /// Finished without error.
    Completed,
    /// Finished with a recorded error.
    Failed,
}

impl JobState {
    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::SettingUp => "setting_up",
            Self::Executing => "executing",
            Self::TearingDown => "tearing_down",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution-side context of one job: its id, position in the batch and
/// the ambient context of the worker running it.
#[derive(Debug)]
pub struct JobContext {
    job_id: Uuid,
    index: usize,
    ambient: Arc<AmbientContext>,
}

impl JobContext {
    /// Creates a context for the job at `index` with a fresh ambient context.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            index,
            ambient: Arc::new(AmbientContext::new()),
        }
    }

    /// Returns the job id.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Returns the job's position within its batch.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the ambient context of the executing worker.
    #[must_use]
    pub fn ambient(&self) -> &Arc<AmbientContext> {
        &self.ambient
    }
}

/// An abstract unit of work with a fixed lifecycle, runnable by a
/// [`crate::batch::BatchPool`].
///
/// The lifecycle is a closed set of callbacks configured on the descriptor:
/// an optional `set_up` (no-op by default), a required `execute`, an optional
/// infallible `tear_down` (no-op by default) and an optional fatal-error
/// classifier. The pool drives the state machine; `execute` never runs before
/// `set_up` completes without error, and `tear_down` runs exactly once per
/// job no matter how `set_up` or `execute` ended.
pub struct BatchJob {
    name: String,
    snapshot: Option<ContextSnapshot>,
    set_up: Option<LifecycleFn>,
    execute: LifecycleFn,
    tear_down: Option<TearDownFn>,
    fatal_classifier: Option<FatalClassifier>,
}

impl BatchJob {
    /// Creates a job with the given `execute` callback and no-op `set_up` and
    /// `tear_down`.
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Arc<JobContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            snapshot: None,
            set_up: None,
            execute: Box::new(move |ctx| Box::pin(execute(ctx))),
            tear_down: None,
            fatal_classifier: None,
        }
    }

    /// Creates a context-aware job.
    ///
    /// The snapshot is captured on the submitting side at construction time;
    /// the installed `set_up` replicates it onto the executing worker's
    /// ambient context before `execute` runs. This is the mechanism by which
    /// identity and diagnostics cross the thread boundary.
    pub fn context_aware<F, Fut>(
        name: impl Into<String>,
        snapshot: ContextSnapshot,
        execute: F,
    ) -> Self
    where
        F: Fn(Arc<JobContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let replicated = snapshot.clone();
        Self::new(name, execute)
            .with_snapshot(snapshot)
            .with_set_up(move |ctx: Arc<JobContext>| {
                let snapshot = replicated.clone();
                async move {
                    ContextReplicator::replicate(&snapshot, ctx.ambient());
                    Ok(())
                }
            })
    }

    /// Attaches the owned context snapshot.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: ContextSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Sets the `set_up` callback.
    #[must_use]
    pub fn with_set_up<F, Fut>(mut self, set_up: F) -> Self
    where
        F: Fn(Arc<JobContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.set_up = Some(Box::new(move |ctx| Box::pin(set_up(ctx))));
        self
    }

    /// Sets the `tear_down` callback.
    ///
    /// `tear_down` releases resources acquired earlier in the lifecycle and
    /// must not fail on the nothing-to-release path, so it is infallible.
    #[must_use]
    pub fn with_tear_down<F, Fut>(mut self, tear_down: F) -> Self
    where
        F: Fn(Arc<JobContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tear_down = Some(Box::new(move |ctx| Box::pin(tear_down(ctx))));
        self
    }

    /// Sets the fatal-error classifier.
    ///
    /// A fatal failure raises the batch stop flag: jobs not yet submitted are
    /// not started, while already-running jobs complete.
    #[must_use]
    pub fn with_fatal_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&JobError) -> bool + Send + Sync + 'static,
    {
        self.fatal_classifier = Some(Box::new(classifier));
        self
    }

    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owned context snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<&ContextSnapshot> {
        self.snapshot.as_ref()
    }

    /// Returns true if the error should stop the rest of the batch.
    #[must_use]
    pub fn is_fatal(&self, error: &JobError) -> bool {
        self.fatal_classifier
            .as_ref()
            .is_some_and(|classifier| classifier(error))
    }

    pub(crate) fn set_up_fn(&self) -> Option<&LifecycleFn> {
        self.set_up.as_ref()
    }

    pub(crate) fn execute_fn(&self) -> &LifecycleFn {
        &self.execute
    }

    pub(crate) fn tear_down_fn(&self) -> Option<&TearDownFn> {
        self.tear_down.as_ref()
    }
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("name", &self.name)
            .field("snapshot", &self.snapshot)
            .field("has_set_up", &self.set_up.is_some())
            .field("has_tear_down", &self.tear_down.is_some())
            .finish()
    }
}

/// The recorded outcome of one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// The job id.
    pub job_id: Uuid,
    /// The job name.
    pub name: String,
    /// The final lifecycle state, `Completed` or `Failed`.
    pub state: JobState,
    /// The recorded error for failed jobs.
    pub error: Option<JobError>,
    /// Wall-clock latency from `set_up` start to `tear_down` end.
    pub latency: Duration,
    /// Whether the error was classified fatal for the batch.
    pub fatal: bool,
}

impl JobOutcome {
    /// Returns true if the job completed without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }

    /// Returns the failure kind, if the job failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<JobErrorKind> {
        self.error.as_ref().map(JobError::kind)
    }
}

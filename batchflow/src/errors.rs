//! Error types for the batchflow framework.
//!
//! Failures are recovered at the smallest scope that can safely absorb them:
//! a job failure is recorded in its [`crate::batch::JobOutcome`] and never
//! aborts sibling jobs, a batch, or the run. Only configuration problems are
//! fatal, and only before the first worker starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The main error type for batchflow operations.
#[derive(Debug, Error)]
pub enum BatchflowError {
    /// The run configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A record lock could not be acquired within its timeout.
    #[error("{0}")]
    LockTimeout(#[from] LockTimeoutError),

    /// A job-level failure.
    #[error("{0}")]
    Job(#[from] JobError),

    /// A batch was aborted by a fatal job failure.
    #[error("Batch aborted: {0}")]
    BatchAborted(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error raised when the run configuration fails validation.
///
/// Always fatal, and always raised before any worker loop starts.
#[derive(Debug, Clone, Error)]
#[error("Invalid configuration: {message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The offending field, if known.
    pub field: Option<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a configuration error for a specific field.
    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Error raised when an exclusive record lock is not granted within its
/// timeout.
///
/// The bounded wait converts unavoidable contention into an explicit,
/// reportable error rather than a stall.
#[derive(Debug, Clone, Error)]
#[error("record '{key}' is held by another owner; '{holder}' gave up after {}ms", timeout.as_millis())]
pub struct LockTimeoutError {
    /// The contended record key.
    pub key: String,
    /// The identity of the failed acquirer.
    pub holder: String,
    /// The configured acquisition timeout.
    pub timeout: Duration,
}

impl LockTimeoutError {
    /// Creates a new lock timeout error.
    #[must_use]
    pub fn new(key: impl Into<String>, holder: impl Into<String>, timeout: Duration) -> Self {
        Self {
            key: key.into(),
            holder: holder.into(),
            timeout,
        }
    }
}

/// A job-level failure, isolated to the job that raised it.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The `set_up` phase failed; `execute` never ran.
    #[error("Job setup failed: {0}")]
    Setup(String),

    /// The `execute` phase failed.
    #[error("Job execution failed: {0}")]
    Execution(String),

    /// A record lock acquisition timed out during `execute`.
    #[error("{0}")]
    LockTimeout(#[from] LockTimeoutError),
}

impl JobError {
    /// Creates a setup failure.
    #[must_use]
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }

    /// Creates an execution failure.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Returns the kind of this error, used for summary counting.
    #[must_use]
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::Setup(_) => JobErrorKind::Setup,
            Self::Execution(_) => JobErrorKind::Execution,
            Self::LockTimeout(_) => JobErrorKind::LockTimeout,
        }
    }
}

/// The kind of a job failure, aggregated upward as counts in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobErrorKind {
    /// `set_up` failed.
    Setup,
    /// `execute` failed.
    Execution,
    /// A record lock acquisition timed out.
    LockTimeout,
}

impl JobErrorKind {
    /// Human-readable name for summaries and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Execution => "execution",
            Self::LockTimeout => "lock_timeout",
        }
    }
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::for_field("thread_count", "thread_count must be at least 1");
        assert_eq!(err.field.as_deref(), Some("thread_count"));
        assert!(err.to_string().contains("thread_count must be at least 1"));
    }

    #[test]
    fn test_lock_timeout_error_display() {
        let err = LockTimeoutError::new("user-42", "worker-1", Duration::from_millis(100));
        let rendered = err.to_string();
        assert!(rendered.contains("user-42"));
        assert!(rendered.contains("worker-1"));
        assert!(rendered.contains("100ms"));
    }

    #[test]
    fn test_job_error_kind() {
        assert_eq!(JobError::setup("boom").kind(), JobErrorKind::Setup);
        assert_eq!(JobError::execution("boom").kind(), JobErrorKind::Execution);

        let timeout = LockTimeoutError::new("k", "h", Duration::from_millis(1));
        assert_eq!(
            JobError::from(timeout).kind(),
            JobErrorKind::LockTimeout
        );
    }

    #[test]
    fn test_job_error_kind_name() {
        assert_eq!(JobErrorKind::LockTimeout.name(), "lock_timeout");
        assert_eq!(JobErrorKind::Setup.to_string(), "setup");
    }

    #[test]
    fn test_batchflow_error_conversions() {
        let err: BatchflowError = ConfigurationError::new("bad").into();
        assert!(matches!(err, BatchflowError::Configuration(_)));

        let err: BatchflowError = JobError::execution("boom").into();
        assert!(matches!(err, BatchflowError::Job(_)));
    }
}

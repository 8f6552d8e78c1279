//! Run configuration for the load-generation driver.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of one driver run.
///
/// Immutable for the lifetime of the run and validated before the first
/// worker starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Number of independent worker loops.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Number of jobs per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Run duration in minutes. Zero means "run exactly one batch per
    /// worker and stop".
    #[serde(default = "default_duration_mins")]
    pub duration_mins: u64,

    /// Pause between batches, in seconds.
    #[serde(default = "default_pause_seconds")]
    pub pause_seconds: u64,

    /// Base URL of the authentication service.
    #[serde(default)]
    pub auth_service_url: String,

    /// Base URL of the scalable service under test.
    #[serde(default)]
    pub scalable_service_url: String,
}

fn default_thread_count() -> usize {
    30
}

fn default_batch_size() -> usize {
    1000
}

fn default_duration_mins() -> u64 {
    10
}

fn default_pause_seconds() -> u64 {
    10
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            batch_size: default_batch_size(),
            duration_mins: default_duration_mins(),
            pause_seconds: default_pause_seconds(),
            auth_service_url: String::new(),
            scalable_service_url: String::new(),
        }
    }
}

impl RunConfiguration {
    /// Creates a configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from `BATCHFLOW_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();
        config.thread_count = read_env("BATCHFLOW_THREAD_COUNT", config.thread_count)?;
        config.batch_size = read_env("BATCHFLOW_BATCH_SIZE", config.batch_size)?;
        config.duration_mins = read_env("BATCHFLOW_DURATION_MINS", config.duration_mins)?;
        config.pause_seconds = read_env("BATCHFLOW_PAUSE_SECONDS", config.pause_seconds)?;
        if let Ok(url) = std::env::var("BATCHFLOW_AUTH_SERVICE_URL") {
            config.auth_service_url = url;
        }
        if let Ok(url) = std::env::var("BATCHFLOW_SCALABLE_SERVICE_URL") {
            config.scalable_service_url = url;
        }
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for a non-positive thread count or
    /// batch size. Target URLs are validated by the client that uses them,
    /// before the driver starts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.thread_count == 0 {
            return Err(ConfigurationError::for_field(
                "thread_count",
                "thread_count must be at least 1",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigurationError::for_field(
                "batch_size",
                "batch_size must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the run deadline as a duration, zero when `duration_mins` is
    /// zero.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.duration_mins * 60)
    }

    /// Returns the inter-batch pause as a duration.
    #[must_use]
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_seconds)
    }

    /// Sets the thread count.
    #[must_use]
    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the duration in minutes.
    #[must_use]
    pub fn with_duration_mins(mut self, mins: u64) -> Self {
        self.duration_mins = mins;
        self
    }

    /// Sets the inter-batch pause in seconds.
    #[must_use]
    pub fn with_pause_seconds(mut self, seconds: u64) -> Self {
        self.pause_seconds = seconds;
        self
    }
}

fn read_env<T: std::str::FromStr>(name: &str, fallback: T) -> Result<T, ConfigurationError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            ConfigurationError::for_field(name, format!("cannot parse '{raw}' for {name}"))
        }),
        Err(_) => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfiguration::default();
        assert_eq!(config.thread_count, 30);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.duration_mins, 10);
        assert_eq!(config.pause_seconds, 10);
    }

    #[test]
    fn test_validate_rejects_zero_thread_count() {
        let config = RunConfiguration::default().with_thread_count(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("thread_count"));
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = RunConfiguration::default().with_batch_size(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("batch_size"));
    }

    #[test]
    fn test_deserialization_applies_defaults() {
        let config: RunConfiguration =
            serde_json::from_str(r#"{"thread_count": 4}"#).unwrap();
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.batch_size, 1000);
    }

    #[test]
    fn test_deadline_and_pause() {
        let config = RunConfiguration::default()
            .with_duration_mins(2)
            .with_pause_seconds(5);
        assert_eq!(config.deadline(), Duration::from_secs(120));
        assert_eq!(config.pause(), Duration::from_secs(5));
    }
}

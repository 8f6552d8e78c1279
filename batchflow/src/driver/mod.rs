//! Load-generation driver: configuration, live measurement and the worker
//! loops that exercise the batch framework under configurable concurrency
//! and pacing.

mod config;
#[cfg(test)]
mod integration_tests;
mod runner;
mod stats;

pub use config::RunConfiguration;
pub use runner::{BatchDriver, BatchFactory, DriverState, RunSummary, WorkerContext};
pub use stats::{MeasurementStats, RollingWindow};

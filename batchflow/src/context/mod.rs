//! Context management for batch execution.
//!
//! This module provides:
//! - Immutable context snapshots safe to move across thread boundaries
//! - A per-worker ambient context and the replicator that applies snapshots
//!   onto it
//! - A thread-partitioned diagnostic tag store with scoped, exactly-restoring
//!   mutation

mod ambient;
mod diagnostic;
mod snapshot;

pub use ambient::{AmbientContext, ContextReplicator};
pub use diagnostic::{DiagnosticContext, DiagnosticScope};
pub use snapshot::{ContextSnapshot, ANONYMOUS};

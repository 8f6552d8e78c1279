//! Per-worker ambient context and snapshot replication.
//!
//! The ambient context is an explicit object threaded through worker-loop and
//! job APIs, not hidden global state. A thread-scoped `current` slot exists
//! only as the boundary where a true ambient mechanism is unavoidable, i.e.
//! log-sink integration.

use super::{ContextSnapshot, DiagnosticContext};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The mutable ambient state of one worker: current identity, roles,
/// correlation id and diagnostic tags.
///
/// Each worker owns its own instance; replication only ever mutates the
/// context it is given, never another worker's.
#[derive(Debug, Default)]
pub struct AmbientContext {
    identity: RwLock<String>,
    roles: RwLock<BTreeSet<String>>,
    correlation_id: RwLock<Option<String>>,
    source: RwLock<Option<String>>,
    diagnostics: Arc<DiagnosticContext>,
}

impl AmbientContext {
    /// Creates a new ambient context with no identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current identity, empty when unauthenticated.
    #[must_use]
    pub fn identity(&self) -> String {
        self.identity.read().clone()
    }

    /// Sets the current identity.
    pub fn set_identity(&self, identity: impl Into<String>) {
        *self.identity.write() = identity.into();
    }

    /// Returns the current roles.
    #[must_use]
    pub fn roles(&self) -> BTreeSet<String> {
        self.roles.read().clone()
    }

    /// Adds a role.
    pub fn add_role(&self, role: impl Into<String>) {
        self.roles.write().insert(role.into());
    }

    /// Returns the correlation id, if set.
    #[must_use]
    pub fn correlation_id(&self) -> Option<String> {
        self.correlation_id.read().clone()
    }

    /// Sets the correlation id.
    pub fn set_correlation_id(&self, id: impl Into<String>) {
        *self.correlation_id.write() = Some(id.into());
    }

    /// Returns the originating-subsystem tag, if set.
    #[must_use]
    pub fn source(&self) -> Option<String> {
        self.source.read().clone()
    }

    /// Sets the originating-subsystem tag.
    pub fn set_source(&self, source: impl Into<String>) {
        *self.source.write() = Some(source.into());
    }

    /// Returns the diagnostic tag store.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticContext> {
        &self.diagnostics
    }

    /// Installs this context as the calling thread's current one.
    ///
    /// Only the log-sink boundary should read the current slot; everything
    /// else receives the context explicitly.
    pub fn install_current(self: &Arc<Self>) {
        CURRENT.with(|slot| *slot.borrow_mut() = Some(self.clone()));
    }

    /// Returns the calling thread's current context, if one is installed.
    #[must_use]
    pub fn current() -> Option<Arc<Self>> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// Clears the calling thread's current slot.
    pub fn clear_current() {
        CURRENT.with(|slot| *slot.borrow_mut() = None);
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<AmbientContext>>> = const { RefCell::new(None) };
}

/// Applies a [`ContextSnapshot`] onto a worker's ambient context, so that
/// code running on a different thread than the one that captured the snapshot
/// observes the same identity and diagnostics.
pub struct ContextReplicator;

impl ContextReplicator {
    /// Replicates the snapshot onto the target context.
    ///
    /// Idempotent: replicating the same snapshot twice is a no-op beyond the
    /// second write. Never fails; a snapshot with missing fields degrades to
    /// "anonymous"/absent rather than raising an error.
    pub fn replicate(snapshot: &ContextSnapshot, target: &AmbientContext) {
        if snapshot.identity.is_empty() {
            target.set_identity(super::snapshot::ANONYMOUS);
        } else {
            target.set_identity(&snapshot.identity);
        }

        for role in &snapshot.roles {
            target.add_role(role);
        }

        if let Some(ref id) = snapshot.correlation_id {
            target.set_correlation_id(id);
        }

        if let Some(ref source) = snapshot.source {
            target.set_source(source);
        }

        for (name, value) in &snapshot.tags {
            target.diagnostics().put(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_applies_identity_and_tags() {
        let snapshot = ContextSnapshot::anonymous()
            .with_identity("alice")
            .with_role("admin")
            .with_correlation_id("corr-5")
            .with_tag("worker", "2");

        let target = AmbientContext::new();
        ContextReplicator::replicate(&snapshot, &target);

        assert_eq!(target.identity(), "alice");
        assert!(target.roles().contains("admin"));
        assert_eq!(target.correlation_id().as_deref(), Some("corr-5"));
        assert_eq!(
            target.diagnostics().get("worker"),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_replicate_is_idempotent() {
        let snapshot = ContextSnapshot::anonymous()
            .with_identity("alice")
            .with_tag("worker", "2");

        let target = AmbientContext::new();
        ContextReplicator::replicate(&snapshot, &target);
        ContextReplicator::replicate(&snapshot, &target);

        assert_eq!(target.identity(), "alice");
        assert_eq!(target.diagnostics().len(), 1);
    }

    #[test]
    fn test_replicate_degrades_missing_identity() {
        let snapshot = ContextSnapshot {
            identity: String::new(),
            ..ContextSnapshot::anonymous()
        };

        let target = AmbientContext::new();
        target.set_identity("previous");
        ContextReplicator::replicate(&snapshot, &target);

        assert_eq!(target.identity(), "anonymous");
    }

    #[test]
    fn test_replicate_across_threads() {
        let ambient = AmbientContext::new();
        ambient.set_identity("submitter");
        ambient.diagnostics().put("origin", "request-7");
        let snapshot = ContextSnapshot::capture(&ambient);

        let handle = std::thread::spawn(move || {
            let worker = AmbientContext::new();
            ContextReplicator::replicate(&snapshot, &worker);
            (worker.identity(), worker.diagnostics().get("origin"))
        });

        let (identity, origin) = handle.join().expect("worker thread panicked");
        assert_eq!(identity, "submitter");
        assert_eq!(origin, Some("request-7".to_string()));
    }

    #[test]
    fn test_current_slot_is_thread_scoped() {
        let ctx = Arc::new(AmbientContext::new());
        ctx.set_identity("main-thread");
        ctx.install_current();

        assert_eq!(
            AmbientContext::current().map(|c| c.identity()),
            Some("main-thread".to_string())
        );

        let handle = std::thread::spawn(|| AmbientContext::current().is_none());
        assert!(handle.join().expect("thread panicked"));

        AmbientContext::clear_current();
        assert!(AmbientContext::current().is_none());
    }
}

//! Immutable context snapshots for cross-thread propagation.

use super::AmbientContext;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The identity recorded when no authenticated principal is present.
pub const ANONYMOUS: &str = "anonymous";

/// An immutable capture of the ambient execution context of one logical
/// submitter.
///
/// Snapshots are captured exactly once per submitter (typically once per
/// inbound request, or once per driver worker at start-up) at the point a
/// unit of work is about to be handed to a different thread. They are
/// read-only thereafter and safe to share across threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The authenticated principal, or [`ANONYMOUS`].
    pub identity: String,

    /// The principal's roles/authorities.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,

    /// Correlation/trace identifier, if one was present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Tag identifying the originating subsystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Diagnostic tags captured from the submitter.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl ContextSnapshot {
    /// Creates the degraded snapshot used when no identity is available.
    ///
    /// Absence of an authenticated identity is not an error: diagnostic
    /// enrichment must never abort the unit of work it decorates.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            identity: ANONYMOUS.to_string(),
            roles: BTreeSet::new(),
            correlation_id: None,
            source: None,
            tags: HashMap::new(),
        }
    }

    /// Captures the calling worker's current ambient context.
    ///
    /// Never blocks and never fails; a missing identity yields the anonymous
    /// snapshot.
    #[must_use]
    pub fn capture(ambient: &AmbientContext) -> Self {
        let identity = ambient.identity();
        Self {
            identity: if identity.is_empty() {
                ANONYMOUS.to_string()
            } else {
                identity
            },
            roles: ambient.roles(),
            correlation_id: ambient.correlation_id(),
            source: ambient.source(),
            tags: ambient.diagnostics().to_dict(),
        }
    }

    /// Sets the identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the originating-subsystem tag.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a diagnostic tag.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Returns true if this is the anonymous snapshot.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.identity == ANONYMOUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_snapshot() {
        let snapshot = ContextSnapshot::anonymous();
        assert!(snapshot.is_anonymous());
        assert!(snapshot.roles.is_empty());
        assert!(snapshot.correlation_id.is_none());
    }

    #[test]
    fn test_snapshot_builder() {
        let snapshot = ContextSnapshot::anonymous()
            .with_identity("alice")
            .with_role("admin")
            .with_correlation_id("corr-1")
            .with_source("loadgen")
            .with_tag("worker", "3");

        assert_eq!(snapshot.identity, "alice");
        assert!(snapshot.roles.contains("admin"));
        assert_eq!(snapshot.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(snapshot.source.as_deref(), Some("loadgen"));
        assert_eq!(snapshot.tags.get("worker").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_capture_from_ambient() {
        let ambient = AmbientContext::new();
        ambient.set_identity("worker-7");
        ambient.add_role("TESTER");
        ambient.set_correlation_id("corr-9");
        ambient.diagnostics().put("batch", "12");

        let snapshot = ContextSnapshot::capture(&ambient);
        assert_eq!(snapshot.identity, "worker-7");
        assert!(snapshot.roles.contains("TESTER"));
        assert_eq!(snapshot.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(snapshot.tags.get("batch").map(String::as_str), Some("12"));
    }

    #[test]
    fn test_capture_without_identity_degrades_to_anonymous() {
        let ambient = AmbientContext::new();
        let snapshot = ContextSnapshot::capture(&ambient);
        assert!(snapshot.is_anonymous());
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = ContextSnapshot::anonymous()
            .with_identity("bob")
            .with_tag("source", "test");
        let json = serde_json::to_string(&snapshot).unwrap();
        let deserialized: ContextSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(snapshot, deserialized);
    }
}

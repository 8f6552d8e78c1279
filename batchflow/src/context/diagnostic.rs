//! Thread-partitioned diagnostic tag store with scoped mutation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A (name → value) diagnostic tag store owned by a single worker.
///
/// Each worker owns its own store, so no cross-thread coordination is needed
/// beyond the interior lock. At most one value exists per name; the prior
/// value is restorable exactly, including the "was unset" case.
#[derive(Debug, Default)]
pub struct DiagnosticContext {
    tags: RwLock<HashMap<String, String>>,
}

impl DiagnosticContext {
    /// Creates a new empty diagnostic context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the value of a tag.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.tags.read().get(name).cloned()
    }

    /// Sets a tag, overwriting any prior value.
    pub fn put(&self, name: impl Into<String>, value: impl Into<String>) {
        self.tags.write().insert(name.into(), value.into());
    }

    /// Removes a tag entirely.
    ///
    /// Removal is distinct from setting an empty value: a removed tag reads
    /// back as `None`.
    pub fn remove(&self, name: &str) {
        self.tags.write().remove(name);
    }

    /// Returns a copy of all tags.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, String> {
        self.tags.read().clone()
    }

    /// Returns the number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    /// Returns true if no tags are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.read().is_empty()
    }
}

/// Overwrites one diagnostic tag for the duration of a scope.
///
/// On construction the current value of the tag is recorded and replaced; on
/// drop the recorded value is restored verbatim. A tag that was unset before
/// the scope is unset again afterwards, not coerced to an empty string.
/// Because restoration happens in [`Drop`], it runs on every exit path of the
/// protected region. Nested scopes on the same name restore in LIFO order.
#[must_use = "the tag is restored when the scope is dropped"]
pub struct DiagnosticScope {
    ctx: Arc<DiagnosticContext>,
    name: String,
    prior: Option<String>,
}

impl DiagnosticScope {
    /// Enters a scope that sets `name` to `value`.
    pub fn enter(
        ctx: Arc<DiagnosticContext>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let prior = ctx.get(&name);
        ctx.put(&name, value.into());
        Self { ctx, name, prior }
    }

    /// Enters a scope that sets `name` to `"value (suffix)"`.
    ///
    /// The suffix disambiguates instances of the same logical tag, e.g. a job
    /// or thread id.
    pub fn enter_with_suffix(
        ctx: Arc<DiagnosticContext>,
        name: impl Into<String>,
        value: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        let rendered = format!("{} ({})", value.into(), suffix.into());
        Self::enter(ctx, name, rendered)
    }

    /// Returns the tag name this scope controls.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value the tag had before this scope was entered.
    #[must_use]
    pub fn prior(&self) -> Option<&str> {
        self.prior.as_deref()
    }
}

impl Drop for DiagnosticScope {
    fn drop(&mut self) {
        match self.prior.take() {
            Some(value) => self.ctx.put(&self.name, value),
            None => self.ctx.remove(&self.name),
        }
    }
}

impl std::fmt::Debug for DiagnosticScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticScope")
            .field("name", &self.name)
            .field("prior", &self.prior)
            .finish()
    }
}

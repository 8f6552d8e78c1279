//! Pessimistic write locks on persisted-record keys.
//!
//! Batch workloads are concurrent and write-heavy on a small set of shared
//! keys, so mutation is serialized pessimistically: the lock is acquired
//! before the mutating operation, and a pending acquisition that cannot be
//! granted within its timeout fails with [`LockTimeoutError`] instead of
//! waiting forever. Release is scoped: dropping the guard releases the lock
//! on every exit path.

use crate::errors::LockTimeoutError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Default acquisition timeout, matching the persistence layer's lock hint.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(3000);

/// A registry of exclusive write locks keyed by record key.
///
/// At most one holder exists per key at any instant. The first successful
/// acquirer wins; all others wait up to their timeout, then fail.
#[derive(Debug, Default)]
pub struct RecordLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecordLockRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusive lock for `key`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeoutError`] if the record is held by another owner
    /// past the timeout.
    pub async fn acquire(
        &self,
        key: impl Into<String>,
        holder: impl Into<String>,
        timeout: Duration,
    ) -> Result<RecordLockGuard, LockTimeoutError> {
        let key = key.into();
        let holder = holder.into();

        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(key = %key, holder = %holder, "record lock acquired");
                Ok(RecordLockGuard {
                    key,
                    holder,
                    acquired_at: Utc::now(),
                    _guard: guard,
                })
            }
            Err(_) => Err(LockTimeoutError::new(key, holder, timeout)),
        }
    }

    /// Acquires with [`DEFAULT_LOCK_TIMEOUT`].
    pub async fn acquire_default(
        &self,
        key: impl Into<String>,
        holder: impl Into<String>,
    ) -> Result<RecordLockGuard, LockTimeoutError> {
        self.acquire(key, holder, DEFAULT_LOCK_TIMEOUT).await
    }

    /// Returns true if the lock for `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Returns the number of keys the registry has seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no key has been locked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// A held record lock. Dropping the guard releases the lock.
#[must_use = "the lock is released when the guard is dropped"]
pub struct RecordLockGuard {
    key: String,
    holder: String,
    acquired_at: DateTime<Utc>,
    _guard: OwnedMutexGuard<()>,
}

impl RecordLockGuard {
    /// Returns the locked record key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the identity of the holder.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Returns the acquisition timestamp.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl std::fmt::Debug for RecordLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLockGuard")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use raffle_types::EntryId;
use tracing::warn;

use crate::error::{GuardError, GuardResult};

/// Mutual exclusion keyed by entry id.
///
/// `try_acquire` never waits: a caller that gets `false` must back off and
/// report a retryable condition.
#[async_trait]
pub trait VerificationLock: Send + Sync {
    /// Take the lock for `entry`. Returns `false` if already held.
    async fn try_acquire(&self, entry: &EntryId) -> GuardResult<bool>;

    /// Release the lock for `entry`. Releasing an unheld lock is a no-op.
    async fn release(&self, entry: &EntryId) -> GuardResult<()>;
}

/// Scoped ownership of a verification lock.
///
/// Call [`LockGuard::release`] on the normal path. If the guard is dropped
/// without it (panic, cancelled future) the release is spawned onto the
/// current runtime.
pub struct LockGuard {
    lock: Arc<dyn VerificationLock>,
    entry: EntryId,
    released: bool,
}

impl LockGuard {
    /// Try to take the lock. `Ok(None)` means another verification holds it.
    pub async fn acquire(lock: Arc<dyn VerificationLock>, entry: EntryId) -> GuardResult<Option<Self>> {
        if !lock.try_acquire(&entry).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            lock,
            entry,
            released: false,
        }))
    }

    pub fn entry(&self) -> EntryId {
        self.entry
    }

    pub async fn release(mut self) -> GuardResult<()> {
        self.released = true;
        self.lock.release(&self.entry).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = Arc::clone(&self.lock);
        let entry = self.entry;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release(&entry).await {
                        warn!(entry_id = %entry, error = %e, "deferred lock release failed");
                    }
                });
            }
            Err(_) => warn!(entry_id = %entry, "lock guard dropped outside a runtime"),
        }
    }
}

/// Run `work` while holding the lock for `entry`, releasing it on every
/// return path. `Ok(None)` means the lock was busy and `work` never ran.
///
/// Once `work` has run its output is returned even if the release fails.
/// The failure is logged and the lock backend's own expiry reclaims it.
pub async fn with_lock<F, Fut, T>(
    lock: Arc<dyn VerificationLock>,
    entry: EntryId,
    work: F,
) -> GuardResult<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(guard) = LockGuard::acquire(lock, entry).await? else {
        return Ok(None);
    };
    let out = work().await;
    if let Err(e) = guard.release().await {
        warn!(entry_id = %entry, error = %e, "lock release failed after work completed");
    }
    Ok(Some(out))
}

/// Process-local lock table.
#[derive(Debug, Default)]
pub struct InMemoryVerificationLock {
    held: Mutex<HashSet<EntryId>>,
}

impl InMemoryVerificationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, entry: &EntryId) -> bool {
        self.held.lock().map(|h| h.contains(entry)).unwrap_or(false)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl VerificationLock for InMemoryVerificationLock {
    async fn try_acquire(&self, entry: &EntryId) -> GuardResult<bool> {
        let mut held = self.held.lock().map_err(|_| GuardError::Poisoned)?;
        Ok(held.insert(*entry))
    }

    async fn release(&self, entry: &EntryId) -> GuardResult<()> {
        let mut held = self.held.lock().map_err(|_| GuardError::Poisoned)?;
        held.remove(entry);
        Ok(())
    }
}

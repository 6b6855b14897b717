// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-process mutual exclusion.
//!
//! Work that mutates shared distant state non-commutatively (eviction) runs
//! inside [`critical_section`]: try to acquire without waiting, run the body,
//! release on every path. A contended lock is a normal outcome (`Ok(None)`),
//! not an error.
//!
//! ```text
//! try_acquire ──no──▶ Ok(None)
//!      │yes
//!      ▼
//!    body ──▶ release (always) ──▶ Ok(Some(value)) / Err(body error)
//! ```
//!
//! If the body panics or its future is dropped mid-flight, [`LockGuard`]'s
//! `Drop` schedules the release on the current runtime. Backends with a lease
//! ([`RedisLock`]) also free the lock if the holding process dies.

mod memory;
mod redis;

pub use memory::InMemoryLock;
pub use self::redis::RedisLock;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::storage::traits::StorageError;

/// Proof of one successful acquisition.
///
/// Release must present the token it was issued, so a holder whose lease has
/// lapsed cannot free a lock a later acquisition now owns, even through the
/// same handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    fn name(&self) -> &str;

    /// Non-blocking: `Ok(None)` when another holder has it.
    async fn try_acquire(&self) -> Result<Option<LockToken>, StorageError>;

    /// Release the hold identified by `token`. A no-op if that hold has
    /// already lapsed.
    async fn release(&self, token: &LockToken) -> Result<(), StorageError>;
}

/// Held lock; release with [`LockGuard::release`].
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    /// `None` once released
    token: Option<LockToken>,
}

impl LockGuard {
    pub async fn try_acquire(lock: Arc<dyn DistributedLock>) -> Result<Option<Self>, StorageError> {
        match lock.try_acquire().await? {
            Some(token) => {
                debug!(lock = %lock.name(), "Lock acquired");
                Ok(Some(Self { lock, token: Some(token) }))
            }
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    pub async fn release(mut self) -> Result<(), StorageError> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };
        self.lock.release(&token).await?;
        debug!(lock = %self.lock.name(), "Lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let lock = self.lock.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(lock = %lock.name(), "Lock guard dropped while held, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = lock.release(&token).await {
                        warn!(lock = %lock.name(), error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %lock.name(), "Lock guard dropped outside a runtime, relying on lease expiry");
            }
        }
    }
}

/// Run `body` while holding `lock`.
///
/// Returns `Ok(None)` without running `body` if the lock is held elsewhere.
/// The lock is released whether `body` succeeds or fails; a failed release
/// after a successful body is logged, not returned.
pub async fn critical_section<F, Fut, T>(
    lock: &Arc<dyn DistributedLock>,
    body: F,
) -> Result<Option<T>, StorageError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let Some(guard) = LockGuard::try_acquire(lock.clone()).await? else {
        return Ok(None);
    };

    let outcome = body().await;

    if let Err(e) = guard.release().await {
        warn!(lock = %lock.name(), error = %e, "Failed to release lock");
    }

    outcome.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_critical_section_runs_body_and_releases() {
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let dyn_lock: Arc<dyn DistributedLock> = lock.clone();

        let result = critical_section(&dyn_lock, || async {
            assert!(lock.is_held());
            Ok(7)
        })
        .await
        .unwrap();

        assert_eq!(result, Some(7));
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_critical_section_skips_when_contended() {
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let dyn_lock: Arc<dyn DistributedLock> = lock.clone();
        let _held = lock.try_acquire().await.unwrap().unwrap();

        let mut ran = false;
        let result = critical_section(&dyn_lock, || {
            ran = true;
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert!(result.is_none());
        assert!(!ran);
        // Still owned by the first holder
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_critical_section_releases_on_error() {
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let dyn_lock: Arc<dyn DistributedLock> = lock.clone();

        let result: Result<Option<()>, _> = critical_section(&dyn_lock, || async {
            Err(StorageError::Backend("redis went away".into()))
        })
        .await;

        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let guard = LockGuard::try_acquire(lock.clone()).await.unwrap().unwrap();
        assert!(lock.is_held());

        drop(guard);
        for _ in 0..100 {
            if !lock.is_held() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_guards_from_one_handle_release_only_their_own_hold() {
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let dyn_lock: Arc<dyn DistributedLock> = lock.clone();

        let first = LockGuard::try_acquire(dyn_lock.clone()).await.unwrap().unwrap();
        let stale = first.token().cloned().unwrap();
        first.release().await.unwrap();

        let second = LockGuard::try_acquire(dyn_lock.clone()).await.unwrap().unwrap();
        // A late release of the first hold must not free the second
        dyn_lock.release(&stale).await.unwrap();
        assert!(lock.is_held());

        second.release().await.unwrap();
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_critical_section_releases_when_body_panics() {
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let dyn_lock: Arc<dyn DistributedLock> = lock.clone();

        let handle = tokio::spawn(async move {
            let _: Result<Option<()>, _> =
                critical_section(&dyn_lock, || async { panic!("eviction bug") }).await;
        });
        assert!(handle.await.is_err());

        for _ in 0..100 {
            if !lock.is_held() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!lock.is_held());
    }
}

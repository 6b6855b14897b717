// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::pool::{EvictionPool, TrySubmit};
use crate::config::TieredCacheConfig;
use crate::distant::DistantCache;
use crate::hot_keys::HotKeyTracker;
use crate::lock::{critical_section, DistributedLock};
use crate::storage::traits::StorageError;

/// Result of one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOutcome {
    /// Coldest ids removed from the tracker and the distant tier
    Evicted { removed: u64 },
    /// Count was at or below the threshold once the lock was held
    BelowThreshold,
    /// Another holder has the lock; nothing done
    LockContended,
}

/// What a size check did with the pass it wanted to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    /// Tracker at or below `max_items`
    NotNeeded,
    /// Pass queued for a pool worker
    Queued,
    /// Pool saturated; the pass ran on the caller
    RanInline(EvictionOutcome),
    /// Pool shut down; pass dropped
    Closed,
}

/// The locked remove-coldest operation, shared by the controller and its workers.
pub(crate) struct EvictionPass {
    distant: DistantCache,
    tracker: Arc<HotKeyTracker>,
    lock: Arc<dyn DistributedLock>,
    max_items: u64,
    remove_count: u64,
}

impl EvictionPass {
    async fn over_threshold(&self) -> Result<bool, StorageError> {
        let count = self.tracker.count().await?;
        crate::metrics::set_tracker_items(count);
        Ok(count > self.max_items)
    }

    #[tracing::instrument(skip(self), fields(removed))]
    pub(crate) async fn run(&self) -> Result<EvictionOutcome, StorageError> {
        let outcome = critical_section(&self.lock, || async {
            // A racing pass may already have trimmed the ranking
            if !self.over_threshold().await? {
                debug!("Tracker back under threshold, skipping eviction");
                return Ok(EvictionOutcome::BelowThreshold);
            }

            let last_rank = self.remove_count as isize - 1;
            let coldest = self.tracker.bottom_by_score_asc(0, last_rank).await?;
            if coldest.is_empty() {
                return Ok(EvictionOutcome::BelowThreshold);
            }

            let deleted = self.distant.delete_many(&coldest).await?;
            let removed = self.tracker.remove_by_rank_range(0, last_rank).await?;

            tracing::Span::current().record("removed", removed);
            info!(removed, distant_deleted = deleted, "Evicted coldest products");
            crate::metrics::record_eviction(removed);
            Ok(EvictionOutcome::Evicted { removed })
        })
        .await?;

        Ok(outcome.unwrap_or_else(|| {
            debug!(lock = %self.lock.name(), "Eviction lock contended, skipping pass");
            crate::metrics::record_lock_skipped(self.lock.name());
            EvictionOutcome::LockContended
        }))
    }
}

/// Keeps the hot key ranking and the distant tier at or below `max_items`.
///
/// ```text
/// check_size ─▶ count > max? ─no─▶ NotNeeded
///                   │yes
///                   ▼
///              try_submit ─queued─▶ worker: run()
///                   │full
///                   ▼
///              run() on the caller
/// ```
///
/// Must be created inside a Tokio runtime; the worker pool is spawned once at
/// construction.
pub struct EvictionController {
    pass: Arc<EvictionPass>,
    pool: EvictionPool,
}

impl EvictionController {
    pub fn new(
        distant: DistantCache,
        tracker: Arc<HotKeyTracker>,
        lock: Arc<dyn DistributedLock>,
        config: &TieredCacheConfig,
    ) -> Result<Self, StorageError> {
        let pass = Arc::new(EvictionPass {
            distant,
            tracker,
            lock,
            max_items: config.max_items,
            remove_count: config.remove_count(),
        });
        let pool = EvictionPool::spawn(
            config.eviction_workers(),
            config.eviction_queue_capacity,
            pass.clone(),
        )?;
        Ok(Self { pass, pool })
    }

    #[must_use]
    pub fn max_items(&self) -> u64 {
        self.pass.max_items
    }

    #[must_use]
    pub fn remove_count(&self) -> u64 {
        self.pass.remove_count
    }

    /// Whether the tracker currently holds more than `max_items` ids.
    pub async fn needs_eviction(&self) -> Result<bool, StorageError> {
        self.pass.over_threshold().await
    }

    /// Cheap pre-check, then hand a pass to the pool.
    ///
    /// When the pool's queue is full the pass runs here, on the caller.
    pub async fn check_size(&self) -> Result<SizeCheck, StorageError> {
        if !self.needs_eviction().await? {
            return Ok(SizeCheck::NotNeeded);
        }

        match self.pool.try_submit() {
            TrySubmit::Queued => Ok(SizeCheck::Queued),
            TrySubmit::Full => {
                debug!("Eviction queue full, running pass on caller");
                let outcome = self.pass.run().await?;
                Ok(SizeCheck::RanInline(outcome))
            }
            TrySubmit::Closed => {
                warn!("Eviction pool closed, dropping pass");
                Ok(SizeCheck::Closed)
            }
        }
    }

    /// Run one pass now on the caller, bypassing the pool and the pre-check.
    pub async fn run_pass(&self) -> Result<EvictionOutcome, StorageError> {
        self.pass.run().await
    }

    /// Passes waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Stop accepting passes and drain the queue within `grace`, then abort.
    pub async fn shutdown(&self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::distant_key;
    use crate::lock::InMemoryLock;
    use crate::product::Product;
    use crate::storage::memory::InMemoryDistantStore;
    use crate::storage::traits::DistantStore;

    struct Fixture {
        store: Arc<InMemoryDistantStore>,
        tracker: Arc<HotKeyTracker>,
        lock: Arc<InMemoryLock>,
        controller: EvictionController,
    }

    fn fixture(config: TieredCacheConfig) -> Fixture {
        let store = Arc::new(InMemoryDistantStore::new());
        let tracker = Arc::new(HotKeyTracker::new(store.clone()));
        let lock = Arc::new(InMemoryLock::new("DELETE"));
        let controller = EvictionController::new(
            DistantCache::new(store.clone()),
            tracker.clone(),
            lock.clone(),
            &config,
        )
        .unwrap();
        Fixture { store, tracker, lock, controller }
    }

    async fn seed(f: &Fixture, n: u64) {
        let distant = DistantCache::new(f.store.clone());
        for i in 1..=n {
            let id = i.to_string();
            f.tracker.upsert(&id, i as f64).await.unwrap();
            distant.set(&Product::new(&id, format!("P{i}"), 1.0, 1)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_pass_removes_exactly_remove_count_coldest() {
        let f = fixture(TieredCacheConfig::default());
        seed(&f, 700).await;

        let outcome = f.controller.run_pass().await.unwrap();
        assert_eq!(outcome, EvictionOutcome::Evicted { removed: 120 });

        assert_eq!(f.tracker.count().await.unwrap(), 580);
        assert_eq!(f.tracker.bottom_by_score_asc(0, 0).await.unwrap(), vec!["121"]);
        assert_eq!(f.tracker.top_by_score_desc(1).await.unwrap(), vec!["700"]);

        for i in 1..=120 {
            assert!(f.store.get(&distant_key(&i.to_string())).await.unwrap().is_none());
        }
        for i in 121..=700 {
            assert!(f.store.get(&distant_key(&i.to_string())).await.unwrap().is_some());
        }
        assert!(!f.lock.is_held());
    }

    #[tokio::test]
    async fn test_pass_at_threshold_is_noop() {
        let f = fixture(TieredCacheConfig::default());
        seed(&f, 600).await;

        assert_eq!(f.controller.run_pass().await.unwrap(), EvictionOutcome::BelowThreshold);
        assert_eq!(f.tracker.count().await.unwrap(), 600);
        assert_eq!(f.controller.check_size().await.unwrap(), SizeCheck::NotNeeded);
    }

    #[tokio::test]
    async fn test_second_pass_rechecks_and_skips() {
        let f = fixture(TieredCacheConfig::default());
        seed(&f, 650).await;

        assert_eq!(f.controller.run_pass().await.unwrap(), EvictionOutcome::Evicted { removed: 120 });
        // A pass that was queued behind the first one sees 530 and does nothing
        assert_eq!(f.controller.run_pass().await.unwrap(), EvictionOutcome::BelowThreshold);
        assert_eq!(f.tracker.count().await.unwrap(), 530);
    }

    #[tokio::test]
    async fn test_contended_lock_skips_silently() {
        let f = fixture(TieredCacheConfig::default());
        seed(&f, 700).await;
        let _held = f.lock.try_acquire().await.unwrap().unwrap();

        assert_eq!(f.controller.run_pass().await.unwrap(), EvictionOutcome::LockContended);
        assert_eq!(f.tracker.count().await.unwrap(), 700);
        assert!(f.lock.is_held());
    }

    #[tokio::test]
    async fn test_check_size_queues_pass_for_workers() {
        let f = fixture(TieredCacheConfig::default());
        seed(&f, 700).await;

        assert_eq!(f.controller.check_size().await.unwrap(), SizeCheck::Queued);

        for _ in 0..200 {
            if f.tracker.count().await.unwrap() == 580 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.tracker.count().await.unwrap(), 580);
        f.controller.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_full_queue_runs_pass_on_caller() {
        let config = TieredCacheConfig {
            eviction_workers: 1,
            eviction_queue_capacity: 1,
            ..Default::default()
        };
        let f = fixture(config);
        seed(&f, 700).await;

        // Hold the lock so queued passes cannot drain anything
        let held = f.lock.try_acquire().await.unwrap().unwrap();
        let mut saw_inline = false;
        for _ in 0..10 {
            if let SizeCheck::RanInline(outcome) = f.controller.check_size().await.unwrap() {
                assert_eq!(outcome, EvictionOutcome::LockContended);
                saw_inline = true;
                break;
            }
        }
        assert!(saw_inline);

        f.lock.release(&held).await.unwrap();
        f.controller.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_check_after_shutdown_is_closed() {
        let f = fixture(TieredCacheConfig::default());
        seed(&f, 700).await;
        f.controller.shutdown(Duration::from_millis(100)).await;

        assert_eq!(f.controller.check_size().await.unwrap(), SizeCheck::Closed);
        assert_eq!(f.tracker.count().await.unwrap(), 700);
    }

    #[tokio::test]
    async fn test_two_instances_share_one_lock() {
        let store = Arc::new(InMemoryDistantStore::new());
        let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryLock::new("DELETE"));
        let config = TieredCacheConfig::default();
        let make = || {
            EvictionController::new(
                DistantCache::new(store.clone()),
                Arc::new(HotKeyTracker::new(store.clone())),
                lock.clone(),
                &config,
            )
            .unwrap()
        };
        let (a, b) = (make(), make());

        let tracker = HotKeyTracker::new(store.clone());
        for i in 1..=700 {
            tracker.upsert(&i.to_string(), i as f64).await.unwrap();
        }

        let (ra, rb) = tokio::join!(a.run_pass(), b.run_pass());
        let removed: u64 = [ra.unwrap(), rb.unwrap()]
            .iter()
            .map(|o| match o {
                EvictionOutcome::Evicted { removed } => *removed,
                _ => 0,
            })
            .sum();

        // Serialized by the lock and the re-check: exactly one pass removes
        assert_eq!(removed, 120);
        assert_eq!(tracker.count().await.unwrap(), 580);
    }

    /// Lock whose acquire never completes; flags when that attempt is dropped.
    #[derive(Default)]
    struct StalledLock {
        entered: Arc<std::sync::atomic::AtomicBool>,
        cancelled: Arc<std::sync::atomic::AtomicBool>,
    }

    struct FlagOnDrop(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for FlagOnDrop {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl DistributedLock for StalledLock {
        fn name(&self) -> &str {
            "DELETE"
        }

        async fn try_acquire(&self) -> Result<Option<crate::lock::LockToken>, StorageError> {
            let _cancelled = FlagOnDrop(self.cancelled.clone());
            self.entered.store(true, std::sync::atomic::Ordering::SeqCst);
            std::future::pending().await
        }

        async fn release(&self, _token: &crate::lock::LockToken) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forced_shutdown_cancels_running_pass() {
        use std::sync::atomic::Ordering;

        let store = Arc::new(InMemoryDistantStore::new());
        let tracker = Arc::new(HotKeyTracker::new(store.clone()));
        let lock = Arc::new(StalledLock::default());
        let controller = EvictionController::new(
            DistantCache::new(store.clone()),
            tracker.clone(),
            lock.clone(),
            &TieredCacheConfig::default(),
        )
        .unwrap();
        for i in 1..=700 {
            tracker.upsert(&i.to_string(), i as f64).await.unwrap();
        }

        assert_eq!(controller.check_size().await.unwrap(), SizeCheck::Queued);
        for _ in 0..200 {
            if lock.entered.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(lock.entered.load(Ordering::SeqCst));
        assert!(!lock.cancelled.load(Ordering::SeqCst));

        controller.shutdown(Duration::from_millis(50)).await;

        // The stalled pass is dropped rather than left running detached
        for _ in 0..200 {
            if lock.cancelled.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(lock.cancelled.load(Ordering::SeqCst));
        assert_eq!(tracker.count().await.unwrap(), 700);
    }
}

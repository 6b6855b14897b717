// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache lifecycle: construction, connecting, start and shutdown.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::{EngineState, TieredCache};
use crate::config::TieredCacheConfig;
use crate::distant::DistantCache;
use crate::eviction::{EvictionController, EvictionOutcome, SizeCheck};
use crate::hot_keys::HotKeyTracker;
use crate::lock::{DistributedLock, RedisLock};
use crate::near::NearCache;
use crate::storage::redis::RedisStore;
use crate::storage::sql::SqlProductStore;
use crate::storage::traits::{BackingStore, DistantStore, StorageError};
use crate::warmer::{CacheWarmer, WarmOutcome};

impl TieredCache {
    /// Assemble a cache from already-connected parts.
    ///
    /// Must be called inside a Tokio runtime (the eviction pool is spawned
    /// here). The cache starts in `Created`: reads work, the warmer does not
    /// run until [`start()`](Self::start).
    pub fn from_parts(
        config: TieredCacheConfig,
        distant_store: Arc<dyn DistantStore>,
        backing: Arc<dyn BackingStore>,
        lock: Arc<dyn DistributedLock>,
    ) -> Result<Self, StorageError> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (warmer_shutdown, _) = watch::channel(false);

        let near = NearCache::from_config(&config);
        let distant = DistantCache::new(distant_store.clone());
        let tracker = Arc::new(HotKeyTracker::new(distant_store));
        let warmer = Arc::new(CacheWarmer::new(
            distant.clone(),
            tracker.clone(),
            near.clone(),
            &config,
        ));
        let eviction = Arc::new(EvictionController::new(
            distant.clone(),
            tracker.clone(),
            lock,
            &config,
        )?);
        let backing_permits = config
            .backing_load_permits
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        crate::metrics::set_engine_state("Created");

        Ok(Self {
            config,
            state: state_tx,
            state_rx,
            near,
            distant,
            tracker,
            backing,
            warmer,
            eviction,
            backing_permits,
            warmer_shutdown,
            warmer_task: Mutex::new(None),
        })
    }

    /// Connect to Redis and SQL from `config.redis_url` / `config.sql_url`.
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: TieredCacheConfig) -> Result<Self, StorageError> {
        let sql_url = config
            .sql_url
            .clone()
            .ok_or_else(|| StorageError::Config("sql_url is required".into()))?;

        let phase_start = Instant::now();
        info!("Connecting to SQL backing store...");
        let backing = SqlProductStore::new(&sql_url).await.inspect_err(|e| {
            error!(error = %e, "Failed to connect to SQL");
            crate::metrics::record_connection_error("sql");
        })?;
        crate::metrics::record_startup_phase("sql_connect", phase_start.elapsed());

        Self::connect_with_backing(config, Arc::new(backing)).await
    }

    /// Connect to Redis from `config.redis_url`, reading through `backing`.
    #[tracing::instrument(skip(config, backing))]
    pub async fn connect_with_backing(
        config: TieredCacheConfig,
        backing: Arc<dyn BackingStore>,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let redis_url = config
            .redis_url
            .clone()
            .ok_or_else(|| StorageError::Config("redis_url is required".into()))?;

        let phase_start = Instant::now();
        info!("Connecting to Redis distant tier...");
        let redis = RedisStore::new(&redis_url).await.inspect_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            crate::metrics::record_connection_error("redis");
        })?;
        crate::metrics::record_startup_phase("redis_connect", phase_start.elapsed());

        let lock = Arc::new(RedisLock::new(
            redis.connection(),
            config.eviction_lock_name.clone(),
            config.lock_lease(),
        ));
        info!("Distant tier connected");

        Self::from_parts(config, Arc::new(redis), backing, lock)
    }

    /// Schedule the warmer. `Created → Running`.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<(), StorageError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StorageError::Config("start must be called inside a Tokio runtime".into()))?;

        // Only the caller that moves the state off Created schedules the warmer
        let won = self.state.send_if_modified(|state| {
            if *state == EngineState::Created {
                *state = EngineState::Running;
                true
            } else {
                false
            }
        });
        if !won {
            return Err(StorageError::Config(format!(
                "cannot start from state {}",
                self.state()
            )));
        }

        let warmer = self.warmer.clone();
        let shutdown = self.warmer_shutdown.subscribe();
        let handle = runtime.spawn(async move { warmer.run(shutdown).await });
        *self.warmer_task.lock() = Some(handle);

        crate::metrics::set_engine_state("Running");
        info!(period = ?self.warmer.period(), "Tiered cache running");
        Ok(())
    }

    /// Run one warmer tick now, serialized with the scheduled ones.
    pub async fn warm_now(&self) -> Result<WarmOutcome, StorageError> {
        self.warmer.tick().await
    }

    /// Run the eviction size check now.
    pub async fn check_eviction(&self) -> Result<SizeCheck, StorageError> {
        self.eviction.check_size().await
    }

    /// Run one eviction pass now on the caller, skipping the queue.
    pub async fn evict_now(&self) -> Result<EvictionOutcome, StorageError> {
        self.eviction.run_pass().await
    }

    /// Stop the warmer and drain the eviction pool within `shutdown_grace_ms`.
    ///
    /// Idempotent; reads keep working afterwards but no longer trigger eviction.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let begun = self.state.send_if_modified(|state| {
            if matches!(state, EngineState::ShuttingDown | EngineState::Stopped) {
                false
            } else {
                *state = EngineState::ShuttingDown;
                true
            }
        });
        if !begun {
            return;
        }

        let shutdown_start = Instant::now();
        info!("Initiating tiered cache shutdown...");
        crate::metrics::set_engine_state("ShuttingDown");

        // One grace budget covers the warmer and the eviction pool together
        let grace = self.config.shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace;
        let _ = self.warmer_shutdown.send(true);
        let warmer_task = self.warmer_task.lock().take();
        if let Some(handle) = warmer_task {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Warmer task ended abnormally"),
                Err(_) => {
                    warn!(?grace, "Warmer did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.eviction.shutdown(remaining).await;

        let _ = self.state.send(EngineState::Stopped);
        crate::metrics::set_engine_state("Stopped");
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Tiered cache shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryLock;
    use crate::product::Product;
    use crate::storage::memory::{InMemoryBackingStore, InMemoryDistantStore};
    use std::time::Duration;

    fn cache_with(config: TieredCacheConfig) -> TieredCache {
        TieredCache::from_parts(
            config,
            Arc::new(InMemoryDistantStore::new()),
            Arc::new(InMemoryBackingStore::new()),
            Arc::new(InMemoryLock::new("DELETE")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = TieredCacheConfig {
            set_count: 0,
            ..Default::default()
        };
        let result = TieredCache::from_parts(
            config,
            Arc::new(InMemoryDistantStore::new()),
            Arc::new(InMemoryBackingStore::new()),
            Arc::new(InMemoryLock::new("DELETE")),
        );
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_requires_urls() {
        let result = TieredCache::connect(TieredCacheConfig::default()).await;
        assert!(matches!(result, Err(StorageError::Config(_))));

        let result = TieredCache::connect_with_backing(
            TieredCacheConfig::default(),
            Arc::new(InMemoryBackingStore::new()),
        )
        .await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_from_parts_outside_runtime_is_config_error() {
        let result = TieredCache::from_parts(
            TieredCacheConfig::default(),
            Arc::new(InMemoryDistantStore::new()),
            Arc::new(InMemoryBackingStore::new()),
            Arc::new(InMemoryLock::new("DELETE")),
        );
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let cache = cache_with(TieredCacheConfig::default());
        let mut states = cache.state_receiver();

        cache.start().unwrap();
        assert!(cache.is_running());
        assert!(cache.start().is_err());

        cache.shutdown().await;
        assert_eq!(cache.state(), EngineState::Stopped);
        assert_eq!(*states.borrow_and_update(), EngineState::Stopped);

        // Second shutdown is a no-op
        cache.shutdown().await;
        assert_eq!(cache.state(), EngineState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_schedule_one_warmer() {
        let cache = Arc::new(cache_with(TieredCacheConfig::default()));
        let starts: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.start().is_ok() })
            })
            .collect();

        let mut won = 0;
        for start in starts {
            if start.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
        assert!(cache.is_running());
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_after_shutdown_rejected() {
        let cache = cache_with(TieredCacheConfig::default());
        cache.shutdown().await;
        assert!(cache.start().is_err());
        assert_eq!(cache.state(), EngineState::Stopped);
        assert!(cache.warmer_task.lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_cache_warms_on_schedule() {
        let cache = cache_with(TieredCacheConfig::default());
        cache.distant().set(&Product::new("1", "Kettle", 29.0, 4)).await.unwrap();
        cache.tracker().upsert("1", 1.0).await.unwrap();

        cache.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert_eq!(cache.warmer().counter(), 3);
        assert_eq!(cache.near().get("1").await.unwrap().name, "Kettle");
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_controls() {
        let cache = cache_with(TieredCacheConfig::default());
        assert_eq!(cache.warm_now().await.unwrap(), WarmOutcome::EmptyRanking);
        assert_eq!(cache.check_eviction().await.unwrap(), SizeCheck::NotNeeded);
        assert_eq!(cache.evict_now().await.unwrap(), EvictionOutcome::BelowThreshold);
    }

    #[tokio::test]
    async fn test_reads_after_shutdown_still_served() {
        let backing = Arc::new(InMemoryBackingStore::new());
        backing.insert(Product::new("1", "Kettle", 29.0, 4));
        let cache = TieredCache::from_parts(
            TieredCacheConfig::default(),
            Arc::new(InMemoryDistantStore::new()),
            backing,
            Arc::new(InMemoryLock::new("DELETE")),
        )
        .unwrap();

        cache.shutdown().await;
        assert_eq!(cache.get_by_id("1").await.unwrap().unwrap().name, "Kettle");
    }

    #[tokio::test]
    async fn test_backing_load_limiter_configured() {
        let config = TieredCacheConfig {
            backing_load_permits: Some(2),
            ..Default::default()
        };
        let cache = cache_with(config);
        assert_eq!(cache.backing_permits.as_ref().unwrap().available_permits(), 2);
        assert!(cache.get_by_id("missing").await.unwrap().is_none());
        assert_eq!(cache.backing_permits.as_ref().unwrap().available_permits(), 2);
    }
}

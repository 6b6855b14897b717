// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered cache coordinator.
//!
//! The [`TieredCache`] ties together all components:
//! - near tier: process-local moka cache with randomized TTL
//! - distant tier: Redis (or any [`DistantStore`]) shared by every instance
//! - backing store: SQL, authoritative
//! - hot key ranking, warmer and eviction over the distant tier
//!
//! # Read Path
//!
//! ```text
//! near ──hit──▶ touch ranking ─────────────────────────────────▶ return
//!  │miss
//!  ▼
//! distant ──hit──▶ touch ranking, fill near ───────────────────▶ return
//!  │miss
//!  ▼
//! backing ──found──▶ touch ranking, fill near + distant,
//!  │                 size check for eviction ──────────────────▶ return
//!  └──not found──────────────────────────────────────────────▶ None
//! ```
//!
//! Fills and ranking updates are best effort: a failing write is logged and
//! the value is still returned. Only a failing backing store load is an error.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tiered_cache::{
//!     EngineState, InMemoryBackingStore, InMemoryDistantStore, InMemoryLock, Product, TieredCache,
//!     TieredCacheConfig,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tiered_cache::StorageError> {
//! let backing = Arc::new(InMemoryBackingStore::new());
//! backing.insert(Product::new("1", "Kettle", 29.0, 4));
//!
//! let cache = TieredCache::from_parts(
//!     TieredCacheConfig::default(),
//!     Arc::new(InMemoryDistantStore::new()),
//!     backing,
//!     Arc::new(InMemoryLock::new("DELETE")),
//! )?;
//! assert_eq!(cache.state(), EngineState::Created);
//!
//! let product = cache.get_by_id("1").await?;
//! assert_eq!(product.map(|p| p.name), Some("Kettle".to_string()));
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{EngineState, Tier};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TieredCacheConfig;
use crate::distant::DistantCache;
use crate::eviction::{EvictionController, SizeCheck};
use crate::hot_keys::HotKeyTracker;
use crate::near::NearCache;
use crate::product::Product;
use crate::storage::traits::{BackingStore, DistantStore, StorageError};
use crate::warmer::CacheWarmer;

/// Three-tier read-through product cache.
///
/// # Thread Safety
///
/// `TieredCache` is `Send + Sync`; share it behind an `Arc`. Every tier
/// handle is internally synchronized.
pub struct TieredCache {
    pub(super) config: TieredCacheConfig,

    /// Lifecycle state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) near: NearCache,
    pub(super) distant: DistantCache,
    pub(super) tracker: Arc<HotKeyTracker>,
    pub(super) backing: Arc<dyn BackingStore>,

    pub(super) warmer: Arc<CacheWarmer>,
    pub(super) eviction: Arc<EvictionController>,

    /// Bounds concurrent backing store loads when configured
    pub(super) backing_permits: Option<Arc<Semaphore>>,

    /// Stops the warmer's run loop
    pub(super) warmer_shutdown: watch::Sender<bool>,
    pub(super) warmer_task: Mutex<Option<JoinHandle<()>>>,
}

impl TieredCache {
    /// Get current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    #[must_use]
    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn near(&self) -> &NearCache {
        &self.near
    }

    #[must_use]
    pub fn distant(&self) -> &DistantCache {
        &self.distant
    }

    /// The raw distant store shared by the tiers, ranking and slots.
    #[must_use]
    pub fn distant_store(&self) -> &Arc<dyn DistantStore> {
        self.distant.store()
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<HotKeyTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn warmer(&self) -> &Arc<CacheWarmer> {
        &self.warmer
    }

    #[must_use]
    pub fn eviction(&self) -> &Arc<EvictionController> {
        &self.eviction
    }

    /// Look up a product, filling faster tiers on the way back.
    ///
    /// Returns `Ok(None)` when the backing store has no such id. Errors only
    /// when the backing store load itself fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Product>, StorageError> {
        Ok(self.get_with_tier(id).await?.map(|(product, _)| product))
    }

    /// [`get_by_id`](Self::get_by_id), also reporting which tier served the read.
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn get_with_tier(&self, id: &str) -> Result<Option<(Product, Tier)>, StorageError> {
        let start = Instant::now();

        // 1. Near tier
        if let Some(product) = self.near.get(id).await {
            self.touch(id).await;
            return Ok(Some(served(product, Tier::Near, start)));
        }
        crate::metrics::record_operation("near", "get", "miss");

        // 2. Distant tier; an unreachable distant tier falls through to the backing store
        match self.distant.get(id).await {
            Ok(Some(product)) => {
                self.touch(id).await;
                self.near.put(id, product.clone()).await;
                return Ok(Some(served(product, Tier::Distant, start)));
            }
            Ok(None) => {
                debug!("Distant miss");
                crate::metrics::record_operation("distant", "get", "miss");
            }
            Err(e) => {
                warn!(error = %e, "Distant lookup failed");
                crate::metrics::record_operation("distant", "get", "error");
                crate::metrics::record_error("distant", "get", "backend");
            }
        }

        // 3. Backing store
        let Some(product) = self.load_from_backing(id).await? else {
            tracing::Span::current().record("tier", "miss");
            debug!("Not found in backing store");
            crate::metrics::record_operation("backing", "get", "miss");
            crate::metrics::record_latency("all", "get", start.elapsed());
            return Ok(None);
        };

        self.touch(id).await;
        self.near.put(id, product.clone()).await;
        if let Err(e) = self.distant.set(&product).await {
            warn!(error = %e, "Failed to fill distant tier");
            crate::metrics::record_operation("distant", "put", "error");
        }
        self.request_eviction_check().await;

        Ok(Some(served(product, Tier::Backing, start)))
    }

    /// One backing store call, behind the load limiter if one is configured.
    async fn load_from_backing(&self, id: &str) -> Result<Option<Product>, StorageError> {
        let _permit = match &self.backing_permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|_| StorageError::Backend("backing load limiter closed".into()))?,
            ),
            None => None,
        };

        self.backing.get_by_id(id).await.inspect_err(|e| {
            warn!(error = %e, "Backing store load failed");
            crate::metrics::record_operation("backing", "get", "error");
            crate::metrics::record_error("backing", "get", "backend");
        })
    }

    async fn touch(&self, id: &str) {
        if let Err(e) = self.tracker.touch(id).await {
            warn!(error = %e, "Failed to update hot key ranking");
            crate::metrics::record_error("distant", "touch", "backend");
        }
    }

    async fn request_eviction_check(&self) {
        match self.eviction.check_size().await {
            Ok(SizeCheck::NotNeeded) | Ok(SizeCheck::Queued) => {}
            Ok(SizeCheck::RanInline(outcome)) => debug!(?outcome, "Eviction ran on the read path"),
            Ok(SizeCheck::Closed) => debug!("Eviction pool closed, size check dropped"),
            Err(e) => {
                warn!(error = %e, "Eviction size check failed");
                crate::metrics::record_error("eviction", "check", "backend");
            }
        }
    }
}

fn served(product: Product, tier: Tier, start: Instant) -> (Product, Tier) {
    tracing::Span::current().record("tier", tier.as_str());
    debug!(tier = %tier, "Cache hit");
    crate::metrics::record_operation(tier.as_str(), "get", "hit");
    crate::metrics::record_latency(tier.as_str(), "get", start.elapsed());
    (product, tier)
}

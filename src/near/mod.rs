// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Near tier: bounded process-local product cache.
//!
//! Entries are keyed `product:local:{id}` and expire according to an
//! [`ExpiryPolicy`] (by default [`RandomTtl`], 5–10 minutes). Capacity
//! eviction is moka's `TinyLFU`; nothing else in the crate removes entries
//! from this tier.

mod expiry;

pub use expiry::{ExpiryPolicy, RandomTtl};

use std::sync::Arc;

use moka::future::Cache;

use crate::config::TieredCacheConfig;
use crate::keys::near_key;
use crate::product::Product;
use expiry::MokaExpiry;

#[derive(Clone)]
pub struct NearCache {
    inner: Cache<String, Product>,
}

impl std::fmt::Debug for NearCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl NearCache {
    pub fn new(max_capacity: u64, policy: impl ExpiryPolicy<Product>) -> Self {
        let inner = Cache::builder()
            .name("product-near-cache")
            .max_capacity(max_capacity)
            .expire_after(MokaExpiry::new(Arc::new(policy)))
            .build();
        Self { inner }
    }

    pub fn from_config(config: &TieredCacheConfig) -> Self {
        let (min, max) = config.near_ttl_range();
        Self::new(config.near_max_capacity, RandomTtl::new(min, max))
    }

    pub async fn get(&self, id: &str) -> Option<Product> {
        self.inner.get(near_key(id).as_str()).await
    }

    /// Overwriting an existing entry keeps its remaining lifetime.
    pub async fn put(&self, id: &str, product: Product) {
        self.inner.insert(near_key(id), product).await;
    }

    /// Insert every product under its own id. Returns how many were written.
    pub async fn put_all(&self, products: impl IntoIterator<Item = Product>) -> usize {
        let mut written = 0;
        for product in products {
            self.inner.insert(near_key(&product.id), product).await;
            written += 1;
        }
        written
    }

    /// Approximate entry count (moka applies writes lazily).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance so counts and evictions are current.
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

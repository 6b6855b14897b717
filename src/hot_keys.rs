// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hot key ranking.
//!
//! Every successful read scores its product id with the access time (epoch
//! millis) in the `hot:product` sorted set. Highest score = most recently
//! read; lowest score = least recently read, which is what eviction removes.
//!
//! Ranks are inclusive and zero-based, matching the sorted set commands they
//! wrap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::keys::HOT_RANKING_KEY;
use crate::product::epoch_millis;
use crate::storage::traits::{DistantStore, StorageError};

pub struct HotKeyTracker {
    store: Arc<dyn DistantStore>,
    ranking_key: String,
    /// Highest score this process has written; a clock step backwards never lowers a score
    high_water: AtomicU64,
}

impl HotKeyTracker {
    pub fn new(store: Arc<dyn DistantStore>) -> Self {
        Self::with_ranking_key(store, HOT_RANKING_KEY)
    }

    pub fn with_ranking_key(store: Arc<dyn DistantStore>, ranking_key: impl Into<String>) -> Self {
        Self {
            store,
            ranking_key: ranking_key.into(),
            high_water: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn ranking_key(&self) -> &str {
        &self.ranking_key
    }

    /// Record an access to `id` now. Returns the score written.
    pub async fn touch(&self, id: &str) -> Result<f64, StorageError> {
        let now = epoch_millis();
        let previous = self.high_water.fetch_max(now, Ordering::AcqRel);
        let score = now.max(previous) as f64;
        self.upsert(id, score).await?;
        Ok(score)
    }

    /// Set the score of `id`, inserting it if absent.
    pub async fn upsert(&self, id: &str, score: f64) -> Result<(), StorageError> {
        self.store.z_upsert(&self.ranking_key, id, score).await
    }

    /// The `limit` most recently accessed ids, hottest first.
    pub async fn top_by_score_desc(&self, limit: usize) -> Result<Vec<String>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store
            .z_rev_range(&self.ranking_key, 0, limit as isize - 1)
            .await
    }

    /// Ids ranked `from_rank..=to_rank` by ascending score, coldest first.
    pub async fn bottom_by_score_asc(&self, from_rank: isize, to_rank: isize) -> Result<Vec<String>, StorageError> {
        self.store
            .z_range_by_rank(&self.ranking_key, from_rank, to_rank)
            .await
    }

    pub async fn count_in_range(&self, min: f64, max: f64) -> Result<u64, StorageError> {
        self.store.z_count(&self.ranking_key, min, max).await
    }

    /// Total number of tracked ids.
    pub async fn count(&self) -> Result<u64, StorageError> {
        self.count_in_range(f64::NEG_INFINITY, f64::INFINITY).await
    }

    /// Remove ids ranked `from_rank..=to_rank` ascending. Returns how many were removed.
    pub async fn remove_by_rank_range(&self, from_rank: isize, to_rank: isize) -> Result<u64, StorageError> {
        self.store
            .z_remove_range_by_rank(&self.ranking_key, from_rank, to_rank)
            .await
    }
}

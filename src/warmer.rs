// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Near tier warmer.
//!
//! Every period the warmer samples the top `hot_product_limit` ids of the hot
//! key ranking into one of `set_count` rotating slots, then promotes the ids
//! present in *every* slot from the distant tier into the near tier. With the
//! defaults an id must stay in the top 50 for three consecutive ticks (about
//! 15 seconds) before it is promoted, which filters out one-off spikes.
//!
//! ```text
//! tick c:  ZREVRANGE hot:product 0 49 ──▶ product:hot:set:{c mod 3} (replace)
//!          SINTER product:hot:set:0 product:hot:set:1 product:hot:set:2
//!          MGET product:redis:{id}... ──▶ near tier
//!          c += 1
//! ```
//!
//! Ticks never overlap: the run loop awaits each tick before the next one, a
//! late tick is skipped rather than bunched, and [`CacheWarmer::tick`] is
//! serialized with the loop. A failed tick is logged and leaves the counter
//! unchanged; the schedule keeps running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::TieredCacheConfig;
use crate::distant::DistantCache;
use crate::hot_keys::HotKeyTracker;
use crate::keys::{all_slot_keys, slot_key};
use crate::near::NearCache;
use crate::storage::traits::StorageError;

/// What one warmer tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmOutcome {
    /// Ranking was empty; no slot written, counter unchanged
    EmptyRanking,
    /// Slot written but no id is in every slot yet
    NoOverlap { slot: u64 },
    /// Ids in every slot, and how many of them were found in the distant tier
    Promoted { slot: u64, sustained: usize, promoted: usize },
}

impl WarmOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::EmptyRanking => "empty_ranking",
            Self::NoOverlap { .. } => "no_overlap",
            Self::Promoted { .. } => "promoted",
        }
    }
}

pub struct CacheWarmer {
    distant: DistantCache,
    tracker: Arc<HotKeyTracker>,
    near: NearCache,
    hot_limit: usize,
    set_count: u64,
    slot_keys: Vec<String>,
    period: Duration,
    /// Ticks completed; selects the slot the next tick overwrites
    counter: AtomicU64,
    tick_gate: Mutex<()>,
}

impl CacheWarmer {
    pub fn new(
        distant: DistantCache,
        tracker: Arc<HotKeyTracker>,
        near: NearCache,
        config: &TieredCacheConfig,
    ) -> Self {
        let set_count = config.set_count.max(1);
        Self {
            distant,
            tracker,
            near,
            hot_limit: config.hot_product_limit,
            set_count,
            slot_keys: all_slot_keys(set_count),
            period: config.warm_interval(),
            counter: AtomicU64::new(0),
            tick_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one sample-intersect-promote cycle.
    #[tracing::instrument(skip(self), fields(slot))]
    pub async fn tick(&self) -> Result<WarmOutcome, StorageError> {
        let _gate = self.tick_gate.lock().await;
        let start = Instant::now();

        let result = self.tick_inner().await;
        match &result {
            Ok(outcome) => crate::metrics::record_warm_tick(outcome.label(), start.elapsed()),
            Err(_) => crate::metrics::record_warm_tick("error", start.elapsed()),
        }
        result
    }

    async fn tick_inner(&self) -> Result<WarmOutcome, StorageError> {
        let hot = self.tracker.top_by_score_desc(self.hot_limit).await?;
        if hot.is_empty() {
            info!("Hot key ranking is empty, nothing to warm");
            return Ok(WarmOutcome::EmptyRanking);
        }

        let counter = self.counter.load(Ordering::Acquire);
        let slot = counter % self.set_count;
        tracing::Span::current().record("slot", slot);

        self.distant
            .store()
            .s_replace(&slot_key(counter, self.set_count), &hot)
            .await?;

        let sustained = self.distant.store().s_intersect(&self.slot_keys).await?;
        let outcome = if sustained.is_empty() {
            debug!(slot, sampled = hot.len(), "No id hot across every slot yet");
            WarmOutcome::NoOverlap { slot }
        } else {
            let products = self.distant.multi_get(&sustained).await?;
            let promoted = self.near.put_all(products.into_iter().flatten()).await;
            if promoted < sustained.len() {
                debug!(
                    missing = sustained.len() - promoted,
                    "Some sustained-hot ids have no distant entry"
                );
            }
            info!(slot, sustained = sustained.len(), promoted, "Promoted sustained-hot products to near tier");
            crate::metrics::record_promotion(promoted);
            crate::metrics::set_near_items(self.near.entry_count());
            WarmOutcome::Promoted {
                slot,
                sustained: sustained.len(),
                promoted,
            }
        };

        self.counter.fetch_add(1, Ordering::AcqRel);
        Ok(outcome)
    }

    /// Tick every period until `shutdown` turns true or its sender is dropped.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period = ?self.period, "Cache warmer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Warmer tick failed");
                        crate::metrics::record_error("warmer", "tick", "backend");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(ticks = self.counter(), "Cache warmer stopped");
    }
}

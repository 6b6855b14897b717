// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entry expiry policies for the near tier.
//!
//! A policy maps an entry's access timestamps to its remaining lifetime and
//! knows nothing about the container holding the entry. [`NearCache`](super::NearCache)
//! adapts it to moka's `Expiry` hook.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use tiered_cache::near::{ExpiryPolicy, RandomTtl};
//!
//! let policy = RandomTtl::new(Duration::from_secs(300), Duration::from_secs(600));
//! let ttl = ExpiryPolicy::<()>::expire_after_create(&policy, "product:local:1", &(), Instant::now()).unwrap();
//! assert!(ttl >= Duration::from_secs(300) && ttl <= Duration::from_secs(600));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Remaining lifetime of an entry as a function of its access history.
///
/// `None` means the entry never expires. The update and read hooks default to
/// keeping whatever lifetime remains, so only creation sets the clock.
pub trait ExpiryPolicy<V>: Send + Sync + 'static {
    fn expire_after_create(&self, key: &str, value: &V, created_at: Instant) -> Option<Duration>;

    fn expire_after_update(
        &self,
        _key: &str,
        _value: &V,
        _updated_at: Instant,
        remaining: Option<Duration>,
    ) -> Option<Duration> {
        remaining
    }

    fn expire_after_read(
        &self,
        _key: &str,
        _value: &V,
        _read_at: Instant,
        remaining: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        remaining
    }
}

/// TTL drawn uniformly from `[min, max]` when an entry is created.
///
/// Spreading lifetimes keeps entries that were loaded together (a warmer
/// batch, a cold start) from all expiring in the same instant and stampeding
/// the distant tier.
#[derive(Debug, Clone, Copy)]
pub struct RandomTtl {
    min: Duration,
    max: Duration,
}

impl RandomTtl {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    #[must_use]
    pub fn range(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

impl Default for RandomTtl {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60), Duration::from_secs(10 * 60))
    }
}

impl<V> ExpiryPolicy<V> for RandomTtl {
    fn expire_after_create(&self, _key: &str, _value: &V, _created_at: Instant) -> Option<Duration> {
        Some(self.sample())
    }
}

/// Bridges an [`ExpiryPolicy`] into moka.
pub(crate) struct MokaExpiry<V> {
    policy: Arc<dyn ExpiryPolicy<V>>,
}

impl<V: 'static> MokaExpiry<V> {
    pub(crate) fn new(policy: Arc<dyn ExpiryPolicy<V>>) -> Self {
        Self { policy }
    }
}

impl<V: 'static> moka::Expiry<String, V> for MokaExpiry<V> {
    fn expire_after_create(&self, key: &String, value: &V, created_at: Instant) -> Option<Duration> {
        self.policy.expire_after_create(key, value, created_at)
    }

    fn expire_after_read(
        &self,
        key: &String,
        value: &V,
        read_at: Instant,
        duration_until_expiry: Option<Duration>,
        last_modified_at: Instant,
    ) -> Option<Duration> {
        self.policy
            .expire_after_read(key, value, read_at, duration_until_expiry, last_modified_at)
    }

    fn expire_after_update(
        &self,
        key: &String,
        value: &V,
        updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.policy
            .expire_after_update(key, value, updated_at, duration_until_expiry)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key naming scheme shared by every process instance.
//!
//! These strings are a compatibility contract with other readers of the
//! same Redis keyspace and must not change.
//!
//! ```
//! use tiered_cache::keys;
//!
//! assert_eq!(keys::near_key("42"), "product:local:42");
//! assert_eq!(keys::distant_key("42"), "product:redis:42");
//! assert_eq!(keys::slot_key(4, 3), "product:hot:set:1");
//! ```

/// Sorted set ranking product ids by last access time.
pub const HOT_RANKING_KEY: &str = "hot:product";

pub const NEAR_KEY_PREFIX: &str = "product:local:";
pub const DISTANT_KEY_PREFIX: &str = "product:redis:";
pub const SLOT_KEY_PREFIX: &str = "product:hot:set:";

pub const HOT_PRODUCT_LIMIT: usize = 50;
pub const SET_COUNT: u64 = 3;
pub const MAX_ITEMS: u64 = 600;
pub const REMOVE_RATE: f64 = 0.2;

#[inline]
pub fn near_key(id: &str) -> String {
    format!("{}{}", NEAR_KEY_PREFIX, id)
}

#[inline]
pub fn distant_key(id: &str) -> String {
    format!("{}{}", DISTANT_KEY_PREFIX, id)
}

/// Rotating window slot for warmer tick `counter`.
#[inline]
pub fn slot_key(counter: u64, set_count: u64) -> String {
    format!("{}{}", SLOT_KEY_PREFIX, counter % set_count)
}

/// Every slot key, in slot order.
pub fn all_slot_keys(set_count: u64) -> Vec<String> {
    (0..set_count).map(|i| slot_key(i, set_count)).collect()
}

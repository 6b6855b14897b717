// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Distant tier eviction.
//!
//! The hot key ranking doubles as an LRU index: the lowest scores are the
//! least recently read ids. When it grows past `max_items`, one pass removes
//! the `floor(max_items * remove_rate)` coldest ids from both the ranking and
//! the distant tier, under a named distributed lock so only one instance
//! trims at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  controller.rs  - EvictionController                         │
//! │  └─ check_size: ZCOUNT pre-check, submit to pool             │
//! │  └─ EvictionPass: lock → re-check → remove coldest → unlock  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  pool.rs        - EvictionPool                               │
//! │  └─ bounded queue, fixed workers, created once               │
//! │  └─ full queue: the submitting caller runs the pass          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The near tier is never evicted here; its entries expire on their own TTL.

mod controller;
mod pool;

pub use controller::{EvictionController, EvictionOutcome, SizeCheck};

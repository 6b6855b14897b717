// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends: Redis for the distant tier, SQL for the backing store,
//! and in-memory stand-ins for both.

pub mod traits;
pub mod memory;
pub mod redis;
pub mod sql;

pub use traits::{BackingStore, DistantStore, StorageError};
pub use memory::{InMemoryBackingStore, InMemoryDistantStore};
pub use self::redis::RedisStore;
pub use sql::SqlProductStore;

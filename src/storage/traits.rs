// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::product::Product;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Remote key/value store shared by every process instance (the distant tier).
///
/// Values are opaque strings; typing happens in
/// [`DistantCache`](crate::distant::DistantCache). Range arguments follow Redis
/// conventions: `start`/`stop` are inclusive ranks and negative values count
/// from the end (`-1` is the last element).
#[async_trait]
pub trait DistantStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Values aligned with `keys`; missing entries are `None`.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError>;

    /// Returns the number of keys that existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StorageError>;

    /// Insert `member` or overwrite its score.
    async fn z_upsert(&self, set_key: &str, member: &str, score: f64) -> Result<(), StorageError>;

    /// Members ranked `start..=stop` by descending score.
    async fn z_rev_range(&self, set_key: &str, start: isize, stop: isize) -> Result<Vec<String>, StorageError>;

    /// Members ranked `start..=stop` by ascending score.
    async fn z_range_by_rank(&self, set_key: &str, start: isize, stop: isize) -> Result<Vec<String>, StorageError>;

    /// Members with `min <= score <= max`.
    async fn z_count(&self, set_key: &str, min: f64, max: f64) -> Result<u64, StorageError>;

    /// Remove members ranked `start..=stop` ascending. Returns how many were removed.
    async fn z_remove_range_by_rank(&self, set_key: &str, start: isize, stop: isize) -> Result<u64, StorageError>;

    async fn s_add(&self, set_key: &str, members: &[String]) -> Result<(), StorageError>;

    /// Replace the whole content of `set_key` with `members`.
    /// Default implementation is delete-then-add; backends should make it atomic.
    async fn s_replace(&self, set_key: &str, members: &[String]) -> Result<(), StorageError> {
        self.delete(&[set_key.to_string()]).await?;
        if members.is_empty() {
            return Ok(());
        }
        self.s_add(set_key, members).await
    }

    /// Intersection of all `set_keys`. A missing set is empty.
    async fn s_intersect(&self, set_keys: &[String]) -> Result<Vec<String>, StorageError>;
}

/// Authoritative source of products (the slowest tier).
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// A miss is `Ok(None)`, never an error.
    async fn get_by_id(&self, id: &str) -> Result<Option<Product>, StorageError>;
}

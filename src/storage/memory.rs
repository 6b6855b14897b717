// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process stand-ins for the distant and backing stores.
//!
//! [`InMemoryDistantStore`] reproduces the Redis semantics the cache relies on
//! (inclusive rank ranges, negative indexes, score-then-member ordering,
//! one type per key), so components can be exercised without a server.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{BackingStore, DistantStore, StorageError};
use crate::product::Product;

enum Value {
    Str(String),
    ZSet(HashMap<String, f64>),
    Set(HashSet<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::ZSet(_) => "zset",
            Value::Set(_) => "set",
        }
    }
}

fn wrong_type(key: &str, found: &Value) -> StorageError {
    StorageError::Backend(format!(
        "WRONGTYPE key '{}' holds a {}",
        key,
        found.type_name()
    ))
}

/// Resolve a Redis-style inclusive rank range against `len` elements.
fn rank_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let n = len as isize;
    let start = if start < 0 { start + n } else { start }.max(0);
    let stop = if stop < 0 { stop + n } else { stop };
    if n == 0 || start > stop || start >= n {
        return None;
    }
    Some((start as usize, stop.min(n - 1) as usize))
}

/// Members ordered by ascending score, ties broken by member.
fn sorted_members(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

pub struct InMemoryDistantStore {
    data: DashMap<String, Value>,
}

impl InMemoryDistantStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of keys of any type
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Score of `member` in `set_key`, if present.
    #[must_use]
    pub fn z_score(&self, set_key: &str, member: &str) -> Option<f64> {
        match self.data.get(set_key).as_deref() {
            Some(Value::ZSet(zset)) => zset.get(member).copied(),
            _ => None,
        }
    }

    /// Members of a plain set, unordered.
    #[must_use]
    pub fn s_members(&self, set_key: &str) -> HashSet<String> {
        match self.data.get(set_key).as_deref() {
            Some(Value::Set(set)) => set.clone(),
            _ => HashSet::new(),
        }
    }

    fn sorted_zset(&self, set_key: &str) -> Result<Vec<(String, f64)>, StorageError> {
        match self.data.get(set_key).as_deref() {
            None => Ok(Vec::new()),
            Some(Value::ZSet(zset)) => Ok(sorted_members(zset)),
            Some(other) => Err(wrong_type(set_key, other)),
        }
    }
}

impl Default for InMemoryDistantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistantStore for InMemoryDistantStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.data.get(key).as_deref() {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, other)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        // MGET yields nil for keys of another type rather than failing
        Ok(keys
            .iter()
            .map(|key| match self.data.get(key).as_deref() {
                Some(Value::Str(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StorageError> {
        Ok(keys.iter().filter(|key| self.data.remove(key.as_str()).is_some()).count() as u64)
    }

    async fn z_upsert(&self, set_key: &str, member: &str, score: f64) -> Result<(), StorageError> {
        let mut entry = self
            .data
            .entry(set_key.to_string())
            .or_insert_with(|| Value::ZSet(HashMap::new()));
        match entry.value_mut() {
            Value::ZSet(zset) => {
                zset.insert(member.to_string(), score);
                Ok(())
            }
            other => Err(wrong_type(set_key, other)),
        }
    }

    async fn z_rev_range(&self, set_key: &str, start: isize, stop: isize) -> Result<Vec<String>, StorageError> {
        let mut members = self.sorted_zset(set_key)?;
        members.reverse();
        Ok(match rank_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].iter().map(|(m, _)| m.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn z_range_by_rank(&self, set_key: &str, start: isize, stop: isize) -> Result<Vec<String>, StorageError> {
        let members = self.sorted_zset(set_key)?;
        Ok(match rank_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].iter().map(|(m, _)| m.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn z_count(&self, set_key: &str, min: f64, max: f64) -> Result<u64, StorageError> {
        match self.data.get(set_key).as_deref() {
            None => Ok(0),
            Some(Value::ZSet(zset)) => {
                Ok(zset.values().filter(|score| **score >= min && **score <= max).count() as u64)
            }
            Some(other) => Err(wrong_type(set_key, other)),
        }
    }

    async fn z_remove_range_by_rank(&self, set_key: &str, start: isize, stop: isize) -> Result<u64, StorageError> {
        let Some(mut entry) = self.data.get_mut(set_key) else {
            return Ok(0);
        };
        let removed = match entry.value_mut() {
            Value::ZSet(zset) => {
                let members = sorted_members(zset);
                match rank_bounds(members.len(), start, stop) {
                    Some((from, to)) => {
                        for (member, _) in &members[from..=to] {
                            zset.remove(member);
                        }
                        (to - from + 1) as u64
                    }
                    None => 0,
                }
            }
            other => return Err(wrong_type(set_key, other)),
        };
        let now_empty = matches!(entry.value(), Value::ZSet(zset) if zset.is_empty());
        drop(entry);
        if now_empty {
            // Redis drops empty aggregates
            self.data.remove(set_key);
        }
        Ok(removed)
    }

    async fn s_add(&self, set_key: &str, members: &[String]) -> Result<(), StorageError> {
        let mut entry = self
            .data
            .entry(set_key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()));
        match entry.value_mut() {
            Value::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            other => Err(wrong_type(set_key, other)),
        }
    }

    async fn s_replace(&self, set_key: &str, members: &[String]) -> Result<(), StorageError> {
        if members.is_empty() {
            self.data.remove(set_key);
        } else {
            self.data.insert(
                set_key.to_string(),
                Value::Set(members.iter().cloned().collect()),
            );
        }
        Ok(())
    }

    async fn s_intersect(&self, set_keys: &[String]) -> Result<Vec<String>, StorageError> {
        let mut acc: Option<HashSet<String>> = None;
        for key in set_keys {
            let members = match self.data.get(key).as_deref() {
                None => HashSet::new(),
                Some(Value::Set(set)) => set.clone(),
                Some(other) => return Err(wrong_type(key, other)),
            };
            acc = Some(match acc {
                None => members,
                Some(prev) => prev.intersection(&members).cloned().collect(),
            });
        }
        Ok(acc.map(|set| set.into_iter().collect()).unwrap_or_default())
    }
}

/// Backing store over a concurrent map, for tests and embedders without SQL.
pub struct InMemoryBackingStore {
    products: DashMap<String, Product>,
}

impl InMemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            products: DashMap::new(),
        }
    }

    pub fn insert(&self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Product> for InMemoryBackingStore {
    fn from_iter<I: IntoIterator<Item = Product>>(iter: I) -> Self {
        let store = Self::new();
        for product in iter {
            store.insert(product);
        }
        store
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Product>, StorageError> {
        Ok(self.products.get(id).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_get_and_multi_get_alignment() {
        let store = InMemoryDistantStore::new();
        store.set("a", "1").await.unwrap();
        store.set("c", "3").await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.get("b").await.unwrap().is_none());

        let values = store.multi_get(&keys(&["a", "b", "c"])).await.unwrap();
        assert_eq!(values, vec![Some("1".to_string()), None, Some("3".to_string())]);
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys() {
        let store = InMemoryDistantStore::new();
        store.set("a", "1").await.unwrap();
        store.z_upsert("z", "m", 1.0).await.unwrap();

        let deleted = store.delete(&keys(&["a", "z", "missing"])).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zset_ordering_and_ranges() {
        let store = InMemoryDistantStore::new();
        for (member, score) in [("c", 3.0), ("a", 1.0), ("b", 2.0), ("d", 4.0)] {
            store.z_upsert("rank", member, score).await.unwrap();
        }

        assert_eq!(store.z_range_by_rank("rank", 0, 1).await.unwrap(), keys(&["a", "b"]));
        assert_eq!(store.z_rev_range("rank", 0, 1).await.unwrap(), keys(&["d", "c"]));
        assert_eq!(store.z_rev_range("rank", 0, -1).await.unwrap(), keys(&["d", "c", "b", "a"]));
        assert_eq!(store.z_range_by_rank("rank", 2, 100).await.unwrap(), keys(&["c", "d"]));
        assert!(store.z_range_by_rank("rank", 5, 10).await.unwrap().is_empty());
        assert!(store.z_range_by_rank("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_z_upsert_overwrites_score() {
        let store = InMemoryDistantStore::new();
        store.z_upsert("rank", "a", 1.0).await.unwrap();
        store.z_upsert("rank", "b", 2.0).await.unwrap();
        store.z_upsert("rank", "a", 3.0).await.unwrap();

        assert_eq!(store.z_score("rank", "a"), Some(3.0));
        assert_eq!(store.z_rev_range("rank", 0, 0).await.unwrap(), keys(&["a"]));
        assert_eq!(store.z_count("rank", f64::NEG_INFINITY, f64::INFINITY).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_z_count_inclusive_bounds() {
        let store = InMemoryDistantStore::new();
        for i in 1..=10 {
            store.z_upsert("rank", &i.to_string(), i as f64).await.unwrap();
        }
        assert_eq!(store.z_count("rank", 3.0, 5.0).await.unwrap(), 3);
        assert_eq!(store.z_count("missing", 0.0, 1.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_z_remove_range_by_rank() {
        let store = InMemoryDistantStore::new();
        for i in 1..=5 {
            store.z_upsert("rank", &format!("m{i}"), i as f64).await.unwrap();
        }
        let removed = store.z_remove_range_by_rank("rank", 0, 1).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.z_range_by_rank("rank", 0, -1).await.unwrap(), keys(&["m3", "m4", "m5"]));

        let removed = store.z_remove_range_by_rank("rank", 0, -1).await.unwrap();
        assert_eq!(removed, 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_replace_and_intersect() {
        let store = InMemoryDistantStore::new();
        store.s_add("s0", &keys(&["a", "b", "c"])).await.unwrap();
        store.s_add("s1", &keys(&["b", "c", "d"])).await.unwrap();
        store.s_replace("s0", &keys(&["b", "x"])).await.unwrap();

        assert_eq!(store.s_members("s0"), keys(&["b", "x"]).into_iter().collect());
        let mut inter = store.s_intersect(&keys(&["s0", "s1"])).await.unwrap();
        inter.sort();
        assert_eq!(inter, keys(&["b"]));

        // A missing set empties the intersection
        assert!(store.s_intersect(&keys(&["s0", "s1", "s2"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_backend_error() {
        let store = InMemoryDistantStore::new();
        store.set("k", "v").await.unwrap();
        let err = store.z_upsert("k", "m", 1.0).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(msg) if msg.contains("WRONGTYPE")));
    }

    #[tokio::test]
    async fn test_backing_store_lookup() {
        let store: InMemoryBackingStore =
            [Product::new("1", "Kettle", 30.0, 4)].into_iter().collect();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_id("1").await.unwrap().unwrap().name, "Kettle");
        assert!(store.get_by_id("2").await.unwrap().is_none());
    }

    #[test]
    fn test_rank_bounds() {
        assert_eq!(rank_bounds(5, 0, -1), Some((0, 4)));
        assert_eq!(rank_bounds(5, -2, -1), Some((3, 4)));
        assert_eq!(rank_bounds(5, 3, 1), None);
        assert_eq!(rank_bounds(0, 0, -1), None);
        assert_eq!(rank_bounds(5, -10, 2), Some((0, 2)));
    }
}

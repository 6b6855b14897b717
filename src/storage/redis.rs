// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis storage backend for the distant tier.
//!
//! Products are stored as JSON strings under `product:redis:{id}`; the hot key
//! ranking is a sorted set and the warmer's rotating window slots are plain
//! sets:
//!
//! ```text
//! product:redis:42      STRING  {"id":"42","name":"...","price":9.5,"stock":3}
//! hot:product           ZSET    member=id score=last access (epoch millis)
//! product:hot:set:{0-2} SET     ids sampled by one warmer tick
//! ```
//!
//! Every command goes through [`retry`] with the query preset, so a blip in
//! the connection costs a few hundred milliseconds instead of a failed read.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client};

use super::traits::{DistantStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

/// Redis encodes unbounded score limits as `-inf` / `+inf`.
fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect with startup-mode retry (fails fast if the URL is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self { connection })
    }

    /// Get a clone of the connection manager (for sharing with [`RedisLock`](crate::lock::RedisLock))
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl DistantStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection.clone();
        retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move { cmd("GET").arg(key).query_async::<Option<String>>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move { cmd("SET").arg(key).arg(value).query_async::<()>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connection.clone();
        // Explicit MGET: a single key must still come back as a list
        retry("redis_mget", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move { cmd("MGET").arg(keys).query_async::<Vec<Option<String>>>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let conn = self.connection.clone();
        retry("redis_del", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move { cmd("DEL").arg(keys).query_async::<u64>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    async fn z_upsert(&self, set_key: &str, member: &str, score: f64) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        retry("redis_zadd", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                cmd("ZADD")
                    .arg(set_key)
                    .arg(score)
                    .arg(member)
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(backend)
    }

    async fn z_rev_range(&self, set_key: &str, start: isize, stop: isize) -> Result<Vec<String>, StorageError> {
        let conn = self.connection.clone();
        retry("redis_zrevrange", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                cmd("ZREVRANGE")
                    .arg(set_key)
                    .arg(start)
                    .arg(stop)
                    .query_async::<Vec<String>>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(backend)
    }

    async fn z_range_by_rank(&self, set_key: &str, start: isize, stop: isize) -> Result<Vec<String>, StorageError> {
        let conn = self.connection.clone();
        retry("redis_zrange", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                cmd("ZRANGE")
                    .arg(set_key)
                    .arg(start)
                    .arg(stop)
                    .query_async::<Vec<String>>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(backend)
    }

    async fn z_count(&self, set_key: &str, min: f64, max: f64) -> Result<u64, StorageError> {
        let conn = self.connection.clone();
        let (min, max) = (score_bound(min), score_bound(max));
        retry("redis_zcount", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let (min, max) = (min.clone(), max.clone());
            async move {
                cmd("ZCOUNT")
                    .arg(set_key)
                    .arg(min)
                    .arg(max)
                    .query_async::<u64>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(backend)
    }

    async fn z_remove_range_by_rank(&self, set_key: &str, start: isize, stop: isize) -> Result<u64, StorageError> {
        let conn = self.connection.clone();
        retry("redis_zremrangebyrank", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                cmd("ZREMRANGEBYRANK")
                    .arg(set_key)
                    .arg(start)
                    .arg(stop)
                    .query_async::<u64>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(backend)
    }

    async fn s_add(&self, set_key: &str, members: &[String]) -> Result<(), StorageError> {
        if members.is_empty() {
            return Ok(());
        }
        let conn = self.connection.clone();
        retry("redis_sadd", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move { cmd("SADD").arg(set_key).arg(members).query_async::<()>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    /// DEL + SADD in one MULTI/EXEC so readers never observe a half-written slot.
    async fn s_replace(&self, set_key: &str, members: &[String]) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        retry("redis_sreplace", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                let mut pipeline = pipe();
                pipeline.atomic().cmd("DEL").arg(set_key).ignore();
                if !members.is_empty() {
                    pipeline.cmd("SADD").arg(set_key).arg(members).ignore();
                }
                pipeline.query_async::<()>(&mut conn).await
            }
        })
        .await
        .map_err(backend)
    }

    async fn s_intersect(&self, set_keys: &[String]) -> Result<Vec<String>, StorageError> {
        if set_keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connection.clone();
        retry("redis_sinter", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move { cmd("SINTER").arg(set_keys).query_async::<Vec<String>>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }
}

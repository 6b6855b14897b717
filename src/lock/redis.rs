// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed named lock.
//!
//! Acquire is `SET {name} {token} NX PX {lease}` and hands the token back to
//! the caller; release deletes the key only if it still holds that token, so
//! a holder whose lease already expired cannot free a lock someone else now
//! owns. The handle keeps no per-hold state and can be shared by every
//! worker in the process.
//!
//! Acquisition is a single attempt. Retrying a `SET NX` whose reply was lost
//! would see our own key and report contention, which is the same outcome as
//! not retrying.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cmd;
use tracing::debug;

use super::{DistributedLock, LockToken};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::StorageError;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisLock {
    connection: ConnectionManager,
    name: String,
    lease: Duration,
}

impl RedisLock {
    pub fn new(connection: ConnectionManager, name: impl Into<String>, lease: Duration) -> Self {
        Self {
            connection,
            name: name.into(),
            lease,
        }
    }

    #[must_use]
    pub fn lease(&self) -> Duration {
        self.lease
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self) -> Result<Option<LockToken>, StorageError> {
        let token = LockToken::generate();
        let lease_ms = self.lease.as_millis().max(1) as u64;
        let mut conn = self.connection.clone();

        let reply: Option<String> = cmd("SET")
            .arg(&self.name)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if reply.is_some() {
            Ok(Some(token))
        } else {
            debug!(lock = %self.name, "Lock held elsewhere");
            Ok(None)
        }
    }

    async fn release(&self, token: &LockToken) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let deleted: i64 = retry("redis_lock_release", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let token = token.as_str().to_string();
            async move {
                cmd("EVAL")
                    .arg(RELEASE_SCRIPT)
                    .arg(1)
                    .arg(&self.name)
                    .arg(token)
                    .query_async::<i64>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if deleted == 0 {
            debug!(lock = %self.name, "Lease expired before release");
        }
        Ok(())
    }
}

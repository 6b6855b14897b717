// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local lock for tests and single-instance deployments.
//!
//! Share one `Arc<InMemoryLock>` between several simulated instances to model
//! contention on the same named lock.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DistributedLock, LockToken};
use crate::storage::traits::StorageError;

#[derive(Debug)]
pub struct InMemoryLock {
    name: String,
    /// Token of the current holder
    holder: Mutex<Option<LockToken>>,
}

impl InMemoryLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            holder: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self) -> Result<Option<LockToken>, StorageError> {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            return Ok(None);
        }
        let token = LockToken::generate();
        *holder = Some(token.clone());
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> Result<(), StorageError> {
        let mut holder = self.holder.lock();
        if holder.as_ref() == Some(token) {
            *holder = None;
        }
        Ok(())
    }
}

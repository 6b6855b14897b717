// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Distant tier: typed product access over a [`DistantStore`].
//!
//! Keys are `product:redis:{id}`. Values that fail to decode as a [`Product`]
//! (foreign writers, schema drift) are reported as absent with a warning, so a
//! bulk read always yields `Vec<Option<Product>>` aligned with its ids.

use std::sync::Arc;

use tracing::warn;

use crate::keys::distant_key;
use crate::product::Product;
use crate::storage::traits::{DistantStore, StorageError};

#[derive(Clone)]
pub struct DistantCache {
    store: Arc<dyn DistantStore>,
}

impl DistantCache {
    pub fn new(store: Arc<dyn DistantStore>) -> Self {
        Self { store }
    }

    /// The underlying store, shared with the tracker and warmer.
    pub fn store(&self) -> &Arc<dyn DistantStore> {
        &self.store
    }

    pub async fn get(&self, id: &str) -> Result<Option<Product>, StorageError> {
        let key = distant_key(id);
        Ok(self.store.get(&key).await?.and_then(|raw| decode(&key, &raw)))
    }

    pub async fn set(&self, product: &Product) -> Result<(), StorageError> {
        let raw = product.to_json()?;
        self.store.set(&distant_key(&product.id), &raw).await
    }

    /// One result per id, in order.
    pub async fn multi_get(&self, ids: &[String]) -> Result<Vec<Option<Product>>, StorageError> {
        let keys: Vec<String> = ids.iter().map(|id| distant_key(id)).collect();
        let values = self.store.multi_get(&keys).await?;
        Ok(keys
            .iter()
            .zip(values)
            .map(|(key, raw)| raw.and_then(|raw| decode(key, &raw)))
            .collect())
    }

    /// Delete the entries of `ids`. Returns how many existed.
    pub async fn delete_many(&self, ids: &[String]) -> Result<u64, StorageError> {
        let keys: Vec<String> = ids.iter().map(|id| distant_key(id)).collect();
        self.store.delete(&keys).await
    }
}

fn decode(key: &str, raw: &str) -> Option<Product> {
    match Product::from_json(raw) {
        Ok(product) => Some(product),
        Err(e) => {
            warn!(key = %key, error = %e, "Ignoring undecodable distant entry");
            None
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Product entity.
//!
//! The [`Product`] is the record every tier caches. Once loaded from the
//! backing store it is treated as immutable for caching purposes, so racing
//! writers populating the same key always write equal values.
//!
//! # Example
//!
//! ```
//! use tiered_cache::Product;
//!
//! let product = Product::new("42", "Espresso Machine", 249.0, 12);
//! let json = product.to_json().unwrap();
//! assert_eq!(Product::from_json(&json).unwrap(), product);
//! ```

use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Opaque identifier (stringified primary key)
    pub id: String,
    pub name: String,
    pub price: f64,
    pub stock: i64,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64, stock: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock,
        }
    }

    /// Serialize for the distant tier.
    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Current wall clock time in epoch millis.
#[inline]
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

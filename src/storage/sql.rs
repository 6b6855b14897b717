// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL backing store for products.
//!
//! The backing store is the authoritative source and is only ever read by id
//! on the cache path. `insert` exists for seeding and tests.
//!
//! ```sql
//! CREATE TABLE product (
//!   id    VARCHAR(64) PRIMARY KEY,
//!   name  VARCHAR(255) NOT NULL,
//!   price DOUBLE NOT NULL,
//!   stock BIGINT NOT NULL
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL text columns may surface as BLOB through the `Any` driver, so text
//! columns are read as `String` first and `Vec<u8>` second.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::traits::{BackingStore, StorageError};
use crate::product::Product;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn text_column(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .ok_or_else(|| StorageError::Backend(format!("Column '{}' is not text", column)))
}

pub struct SqlProductStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlProductStore {
    /// Connect with startup-mode retry and create the table if missing.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS product (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                price REAL NOT NULL,
                stock INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS product (
                id VARCHAR(64) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                price DOUBLE NOT NULL,
                stock BIGINT NOT NULL
            )
            "#
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    /// Insert or overwrite a product row.
    pub async fn insert(&self, product: &Product) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO product (id, name, price, stock) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price = excluded.price,
                stock = excluded.stock"
        } else {
            "INSERT INTO product (id, name, price, stock) VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                name = VALUES(name),
                price = VALUES(price),
                stock = VALUES(stock)"
        };

        retry("sql_insert", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(&product.id)
                .bind(&product.name)
                .bind(product.price)
                .bind(product.stock)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BackingStore for SqlProductStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Product>, StorageError> {
        let row = retry("sql_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, name, price, stock FROM product WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let price: f64 = row
            .try_get("price")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let stock: i64 = row
            .try_get("stock")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(Some(Product {
            id: text_column(&row, "id")?,
            name: text_column(&row, "name")?,
            price,
            stock,
        }))
    }
}

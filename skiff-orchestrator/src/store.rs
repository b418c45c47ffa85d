//! Postgres Store
//!
//! Implements the engine's key-value contract on a single `kv` table.
//! Writes upsert on `(prefix, key)`, so the last write wins and each key is
//! replaced atomically.

use async_trait::async_trait;
use skiff_engine::store::{Store, StoreError};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl Store for PgStore {
    async fn put(&self, prefix: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv (prefix, key, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (prefix, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(prefix)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv WHERE prefix = $1 AND key = $2")
            .bind(prefix)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound {
                prefix: prefix.to_string(),
                key: key.to_string(),
            })
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv WHERE prefix = $1 ORDER BY key ASC")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn delete(&self, prefix: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE prefix = $1 AND key = $2")
            .bind(prefix)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }
}

//! Key-value store contract
//!
//! The engine's only durable state. Values are opaque bytes grouped by
//! prefix; writes are last-write-wins and atomic per key.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

pub const TASKS: &str = "tasks";
pub const KUBES: &str = "kubes";
pub const ACCOUNTS: &str = "accounts";
pub const LOGS: &str = "logs";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{prefix}/{key} not found")]
    NotFound { prefix: String, key: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("failed to encode or decode value: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, prefix: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] for a missing key
    async fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Every value under `prefix`, ordered by key
    async fn get_all(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Deleting a missing key is not an error
    async fn delete(&self, prefix: &str, key: &str) -> Result<(), StoreError>;
}

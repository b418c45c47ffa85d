use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Store, StoreError};

/// In-process store used when no database is configured and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, prefix: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((prefix.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(prefix.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                prefix: prefix.to_string(),
                key: key.to_string(),
            })
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((p, _), _)| p == prefix)
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn delete(&self, prefix: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(prefix.to_string(), key.to_string()));
        Ok(())
    }
}

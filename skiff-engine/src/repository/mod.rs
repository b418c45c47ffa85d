//! Repository Module
//!
//! Typed access to the key-value store. Each repository owns one prefix and
//! stores its records as JSON.

pub mod account;
pub mod kube;
pub mod log;
pub mod task;

pub use account as account_repository;
pub use kube as kube_repository;
pub use log as log_repository;
pub use task as task_repository;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::store::{Store, StoreError};

async fn put_json<T: Serialize>(
    store: &dyn Store,
    prefix: &str,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    store.put(prefix, key, bytes).await
}

async fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    prefix: &str,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(prefix, key).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn list_json<T: DeserializeOwned>(
    store: &dyn Store,
    prefix: &str,
) -> Result<Vec<T>, StoreError> {
    store
        .get_all(prefix)
        .await?
        .iter()
        .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
        .collect()
}

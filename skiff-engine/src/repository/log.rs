//! Log Repository
//!
//! Retained task output, rewritten in full on every flush.

use skiff_core::domain::log::LogEntry;
use uuid::Uuid;

use super::{get_json, put_json};
use crate::store::{LOGS, Store, StoreError};

pub async fn save(store: &dyn Store, task_id: Uuid, entries: &[LogEntry]) -> Result<(), StoreError> {
    put_json(store, LOGS, &task_id.to_string(), &entries).await
}

pub async fn find_by_task(store: &dyn Store, task_id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
    Ok(get_json(store, LOGS, &task_id.to_string())
        .await?
        .unwrap_or_default())
}

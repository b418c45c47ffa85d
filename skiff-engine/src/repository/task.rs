//! Task Repository
//!
//! Snapshots live under `tasks/<taskId>`. Every write replaces the whole
//! snapshot, so readers always see a complete record.

use serde::Serialize;
use serde::de::DeserializeOwned;
use skiff_core::domain::task::TaskSnapshot;
use uuid::Uuid;

use super::{get_json, list_json, put_json};
use crate::store::{Store, StoreError, TASKS};

pub async fn save<C: Serialize>(
    store: &dyn Store,
    snapshot: &TaskSnapshot<C>,
) -> Result<(), StoreError> {
    put_json(store, TASKS, &snapshot.id.to_string(), snapshot).await
}

/// Find a snapshot by task id, decoding its config as `C`
pub async fn find_by_id<C: DeserializeOwned>(
    store: &dyn Store,
    id: Uuid,
) -> Result<Option<TaskSnapshot<C>>, StoreError> {
    get_json(store, TASKS, &id.to_string()).await
}

/// All snapshots of one cluster, oldest first
pub async fn find_by_cluster<C: DeserializeOwned>(
    store: &dyn Store,
    cluster_id: Uuid,
) -> Result<Vec<TaskSnapshot<C>>, StoreError> {
    let mut tasks: Vec<TaskSnapshot<C>> = list_json(store, TASKS).await?;
    tasks.retain(|t| t.cluster_id == cluster_id);
    tasks.sort_by_key(|t| t.created_at);
    Ok(tasks)
}

//! Kube Repository

use skiff_core::domain::kube::Kube;
use uuid::Uuid;

use super::{get_json, list_json, put_json};
use crate::store::{KUBES, Store, StoreError};

pub async fn save(store: &dyn Store, kube: &Kube) -> Result<(), StoreError> {
    put_json(store, KUBES, &kube.id.to_string(), kube).await
}

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<Kube>, StoreError> {
    get_json(store, KUBES, &id.to_string()).await
}

pub async fn list_all(store: &dyn Store) -> Result<Vec<Kube>, StoreError> {
    let mut kubes: Vec<Kube> = list_json(store, KUBES).await?;
    kubes.sort_by_key(|k| k.created_at);
    Ok(kubes)
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<(), StoreError> {
    store.delete(KUBES, &id.to_string()).await
}

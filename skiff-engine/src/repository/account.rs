//! Account Repository
//!
//! Cloud accounts are keyed by name. The engine only reads them; they are
//! written through the accounts endpoint.

use skiff_core::domain::account::CloudAccount;

use super::{get_json, put_json};
use crate::store::{ACCOUNTS, Store, StoreError};

pub async fn save(store: &dyn Store, account: &CloudAccount) -> Result<(), StoreError> {
    put_json(store, ACCOUNTS, &account.name, account).await
}

pub async fn find_by_name(store: &dyn Store, name: &str) -> Result<Option<CloudAccount>, StoreError> {
    get_json(store, ACCOUNTS, name).await
}

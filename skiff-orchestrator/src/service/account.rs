//! Account Service
//!
//! Cloud accounts are written here and only read by the engine.

use skiff_core::domain::account::CloudAccount;
use skiff_core::domain::provider::ProviderKind;
use skiff_engine::repository::account_repository;
use skiff_engine::{Store, StoreError};

/// Service error type
#[derive(Debug)]
pub enum AccountError {
    NotFound(String),
    ValidationError(String),
    StoreError(StoreError),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        AccountError::StoreError(err)
    }
}

/// Store an account, replacing any account of the same name
///
/// Returns the stored account with its credentials redacted.
pub async fn create_account(store: &dyn Store, account: CloudAccount) -> Result<CloudAccount, AccountError> {
    validate_account(&account)?;
    account_repository::save(store, &account).await?;

    tracing::info!("Account '{}' stored for {}", account.name, account.provider);
    Ok(account.redacted())
}

/// Get an account by name, credentials redacted
pub async fn get_account(store: &dyn Store, name: &str) -> Result<CloudAccount, AccountError> {
    let account = account_repository::find_by_name(store, name)
        .await?
        .ok_or_else(|| AccountError::NotFound(format!("account {}", name)))?;

    Ok(account.redacted())
}

fn validate_account(account: &CloudAccount) -> Result<(), AccountError> {
    let valid_name = !account.name.is_empty()
        && account
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_name {
        return Err(AccountError::ValidationError(format!(
            "account name '{}' may only contain letters, digits, dashes and underscores",
            account.name
        )));
    }

    let required: &[&str] = match account.provider {
        ProviderKind::DigitalOcean => &["accessToken"],
        ProviderKind::Aws => &["accessKeyId", "secretAccessKey"],
        ProviderKind::Fake => &[],
    };
    if let Some(missing) = required
        .iter()
        .find(|key| account.credential(key).is_none_or(str::is_empty))
    {
        return Err(AccountError::ValidationError(format!(
            "{} accounts need a '{}' credential",
            account.provider, missing
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_engine::MemoryStore;
    use std::collections::BTreeMap;

    fn account(name: &str, provider: ProviderKind, credentials: &[(&str, &str)]) -> CloudAccount {
        CloudAccount {
            name: name.to_string(),
            provider,
            credentials: credentials
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_validate_account() {
        assert!(validate_account(&account("do-prod", ProviderKind::DigitalOcean, &[("accessToken", "t")])).is_ok());
        assert!(validate_account(&account("local", ProviderKind::Fake, &[])).is_ok());

        assert!(validate_account(&account("", ProviderKind::Fake, &[])).is_err());
        assert!(validate_account(&account("a/b", ProviderKind::Fake, &[])).is_err());
        assert!(validate_account(&account("do", ProviderKind::DigitalOcean, &[])).is_err());
        assert!(validate_account(&account("do", ProviderKind::DigitalOcean, &[("accessToken", "")])).is_err());
        assert!(validate_account(&account("aws", ProviderKind::Aws, &[("accessKeyId", "id")])).is_err());
    }

    #[tokio::test]
    async fn test_accounts_are_returned_redacted() {
        let store = MemoryStore::new();
        let stored = create_account(
            &store,
            account("do", ProviderKind::DigitalOcean, &[("accessToken", "secret")]),
        )
        .await
        .unwrap();
        assert_ne!(stored.credential("accessToken"), Some("secret"));

        let fetched = get_account(&store, "do").await.unwrap();
        assert_eq!(fetched, stored);

        // the engine still sees the real credentials
        let raw = account_repository::find_by_name(&store, "do").await.unwrap().unwrap();
        assert_eq!(raw.credential("accessToken"), Some("secret"));

        assert!(matches!(
            get_account(&store, "missing").await,
            Err(AccountError::NotFound(_))
        ));
    }
}

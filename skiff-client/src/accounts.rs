//! Cloud account endpoints

use skiff_core::domain::account::CloudAccount;

use crate::SkiffClient;
use crate::error::Result;

impl SkiffClient {
    /// Store a cloud account; the echo has its credentials redacted
    pub async fn create_account(&self, account: &CloudAccount) -> Result<CloudAccount> {
        let response = self.client.post(self.url("/accounts")).json(account).send().await?;
        self.handle_response(response).await
    }

    pub async fn get_account(&self, name: &str) -> Result<CloudAccount> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{}", name)))
            .send()
            .await?;
        self.handle_response(response).await
    }
}

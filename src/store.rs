//! HTTP client for the remote record store.
//!
//! Thin wrapper over an authenticated record-collection API. Tokens are
//! acquired lazily and cached; a 401/403 drops the cached token so the
//! next call re-authenticates.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::StoreConfig;
use crate::error::BrokerError;

/// How many records a bootstrap listing fetches at most.
pub const LIST_PAGE_SIZE: usize = 200;

/// Record store client
pub struct RecordStoreClient {
    client: Client,
    base_url: String,
    identity: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl RecordStoreClient {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            identity: config.admin_email.clone(),
            password: config.admin_password.clone(),
            token: Mutex::new(None),
        }
    }

    /// Cached auth token, authenticating on first use.
    async fn token(&self) -> Result<String, BrokerError> {
        let mut token = self.token.lock().await;
        if let Some(token) = token.as_ref() {
            return Ok(token.clone());
        }

        debug!(url = %self.base_url, "Authenticating against record store");
        let response = self
            .client
            .post(format!("{}/api/admins/auth-with-password", self.base_url))
            .json(&json!({ "identity": self.identity, "password": self.password }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Persistence(format!(
                "record store auth failed with {status}: {body}"
            )));
        }

        let body: Value = response.json().await?;
        let fresh = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrokerError::Persistence("record store auth response had no token".to_string())
            })?
            .to_string();

        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached token after an auth failure.
    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn check_auth(&self, status: StatusCode) -> bool {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("Record store token rejected; will re-authenticate on next attempt");
            self.invalidate_token().await;
            return false;
        }
        true
    }

    /// List up to [`LIST_PAGE_SIZE`] records from a collection.
    #[instrument(skip(self))]
    pub async fn list_records(&self, collection: &str) -> Result<Vec<Value>, BrokerError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!(
                "{}/api/collections/{collection}/records?perPage={LIST_PAGE_SIZE}",
                self.base_url
            ))
            .header("Authorization", token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            self.check_auth(status).await;
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Persistence(format!(
                "record list failed with {status}: {body}"
            )));
        }

        let body: Value = response.json().await?;
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(collection, count = items.len(), "Listed records");
        Ok(items)
    }

    /// Create a record; returns its id.
    #[instrument(skip(self, fields))]
    pub async fn create_record(
        &self,
        collection: &str,
        fields: &Value,
    ) -> Result<String, BrokerError> {
        let token = self.token().await?;
        let response = self
            .client
            .post(format!(
                "{}/api/collections/{collection}/records",
                self.base_url
            ))
            .header("Authorization", token)
            .json(fields)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            self.check_auth(status).await;
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Persistence(format!(
                "record create failed with {status}: {body}"
            )));
        }

        let body: Value = response.json().await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrokerError::Persistence("created record had no id".to_string()))
    }

    /// Update an existing record in place.
    #[instrument(skip(self, fields))]
    pub async fn update_record(
        &self,
        collection: &str,
        id: &str,
        fields: &Value,
    ) -> Result<(), BrokerError> {
        let token = self.token().await?;
        let response = self
            .client
            .patch(format!(
                "{}/api/collections/{collection}/records/{id}",
                self.base_url
            ))
            .header("Authorization", token)
            .json(fields)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            self.check_auth(status).await;
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Persistence(format!(
                "record update failed with {status}: {body}"
            )));
        }

        Ok(())
    }
}

//! RTDB-style REST backend for the document store.
//!
//! Collections are plain JSON trees: `GET /users.json?orderBy="userId"&
//! equalTo="..."` returns a `{key: record}` map, `POST /Messages.json`
//! appends under a server-assigned chronological key and answers
//! `{"name": key}`, `PATCH /<path>.json` merges fields (a `null` value
//! deletes the field).

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::{MessageRecord, StoredMessage, StoreError, User, UserRecord};

/// REST adapter over an RTDB-style document store.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct FirebaseStore {
    client: Client,
    base_url: String,
}

/// Shape of the `POST .../Messages.json` response.
#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseStore {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Equality query against a collection: `{key: record}` map, empty
    /// when nothing matches (the store answers `null`, hence the
    /// `Option` before the default).
    async fn query_by_user<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        user_id: &str,
    ) -> Result<BTreeMap<String, T>, StoreError> {
        let url = format!("{}/{collection}.json", self.base_url);
        let equal_to = format!("\"{user_id}\"");
        let response = self
            .client
            .get(&url)
            .query(&[("orderBy", "\"userId\""), ("equalTo", equal_to.as_str())])
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "store query failed (transport)");
                StoreError::Request(e.to_string())
            })?;

        let response = check_status(response).await?;
        let entries: Option<BTreeMap<String, T>> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("{collection} query: {e}")))?;
        Ok(entries.unwrap_or_default())
    }

    pub async fn user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let entries: BTreeMap<String, UserRecord> = self.query_by_user("users", user_id).await?;
        Ok(entries
            .into_iter()
            .next()
            .map(|(key, record)| User { key, record }))
    }

    pub async fn messages_for(&self, user_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let entries: BTreeMap<String, MessageRecord> =
            self.query_by_user("Messages", user_id).await?;
        Ok(entries
            .into_iter()
            .map(|(key, record)| StoredMessage { key, record })
            .collect())
    }

    pub async fn create_message(&self, record: &MessageRecord) -> Result<String, StoreError> {
        let url = format!("{}/Messages.json", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "store create failed (transport)");
                StoreError::Request(e.to_string())
            })?;

        let response = check_status(response).await?;
        let pushed: PushResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("create response: {e}")))?;
        Ok(pushed.name)
    }

    pub async fn mark_answered(&self, message_key: &str) -> Result<(), StoreError> {
        self.patch(
            &format!("Messages/{message_key}"),
            json!({ "isAnswer": true }),
        )
        .await
    }

    pub async fn set_active_job(&self, user_key: &str, handle: &str) -> Result<(), StoreError> {
        self.patch(&format!("users/{user_key}"), json!({ "activeJob": handle }))
            .await
    }

    pub async fn clear_active_job(&self, user_key: &str) -> Result<(), StoreError> {
        // PATCH with null deletes the field.
        self.patch(&format!("users/{user_key}"), json!({ "activeJob": null }))
            .await
    }

    async fn patch(&self, path: &str, body: serde_json::Value) -> Result<(), StoreError> {
        let url = format!("{}/{path}.json", self.base_url);
        let response = self
            .client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "store patch failed (transport)");
                StoreError::Request(e.to_string())
            })?;
        check_status(response).await?;
        Ok(())
    }
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    error!(%status, %body, "store request returned HTTP error");
    Err(StoreError::Request(format!("HTTP {status}: {body}")))
}

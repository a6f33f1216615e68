//! Outbound notifier — best-effort POST of `{userId, message}` to a
//! fixed external address (e.g. a chat-bot bridge).
//!
//! Routing is a namespace convention on the user id: only ids carrying
//! the configured prefix are pushed. An empty prefix routes every user.
//! Failures are reported to the caller for logging, never escalated.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notify request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    url: String,
    user_prefix: String,
}

impl Notifier {
    pub fn new(url: String, user_prefix: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url, user_prefix })
    }

    /// Whether `user_id` belongs to the externally-routed namespace.
    pub fn routes(&self, user_id: &str) -> bool {
        self.user_prefix.is_empty() || user_id.starts_with(&self.user_prefix)
    }

    /// Push one delivery. The response status is logged regardless of
    /// outcome; a non-2xx status is still a delivered notification.
    pub async fn push(&self, user_id: &str, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "userId": user_id, "message": message }))
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        debug!(%user_id, status = %response.status(), "notification posted");
        Ok(())
    }
}

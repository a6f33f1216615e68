//! Threads/runs model backend (OpenAI Assistants v2 wire shape).
//!
//! A round-trip is: append a user message to the thread, start a run,
//! poll the run at a fixed interval until it reaches a terminal state,
//! then read the newest assistant message. The poll carries an explicit
//! deadline and honours a shutdown token — there is no unbounded wait.
//!
//! All wire types are private to this module; callers see only plain
//! strings and [`ChatMessage`].

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{ChatMessage, ModelError};

/// Adapter for a threads/runs conversation API.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct AssistantsClient {
    client: Client,
    api_base_url: String,
    assistant_id: String,
    api_key: Option<String>,
    poll_interval: Duration,
    run_timeout: Duration,
    shutdown: CancellationToken,
}

impl AssistantsClient {
    pub fn new(
        api_base_url: String,
        assistant_id: String,
        api_key: Option<String>,
        request_timeout: Duration,
        poll_interval: Duration,
        run_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base_url,
            assistant_id,
            api_key,
            poll_interval,
            run_timeout,
            shutdown,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}/{path}", self.api_base_url))
            .header("OpenAI-Beta", "assistants=v2");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    pub async fn create_conversation(&self) -> Result<String, ModelError> {
        let response = self
            .request(reqwest::Method::POST, "threads")
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        let thread: ObjectWithId = response
            .json()
            .await
            .map_err(|e| ModelError::Request(format!("failed to parse thread response: {e}")))?;
        debug!(thread = %thread.id, "conversation created");
        Ok(thread.id)
    }

    /// Append `text` (plus any image references) to the thread, run the
    /// assistant, and return the reply text.
    pub async fn send_prompt(
        &self,
        conversation_id: &str,
        text: &str,
        image_urls: &[String],
    ) -> Result<String, ModelError> {
        self.append_message(conversation_id, text, image_urls).await?;
        let run_id = self.start_run(conversation_id).await?;
        self.await_run(conversation_id, &run_id).await?;
        self.latest_assistant_text(conversation_id).await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        text: &str,
        image_urls: &[String],
    ) -> Result<(), ModelError> {
        // Plain string content for text-only; block list when images ride along.
        let content = if image_urls.is_empty() {
            json!(text)
        } else {
            let mut blocks = vec![json!({ "type": "text", "text": text })];
            for url in image_urls {
                blocks.push(json!({ "type": "image_url", "image_url": { "url": url } }));
            }
            json!(blocks)
        };

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("threads/{conversation_id}/messages"),
            )
            .json(&json!({ "role": "user", "content": content }))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn start_run(&self, conversation_id: &str) -> Result<String, ModelError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("threads/{conversation_id}/runs"),
            )
            .json(&json!({ "assistant_id": self.assistant_id }))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        let run: ObjectWithId = response
            .json()
            .await
            .map_err(|e| ModelError::Request(format!("failed to parse run response: {e}")))?;
        debug!(thread = %conversation_id, run = %run.id, "run started");
        Ok(run.id)
    }

    /// Poll the run until terminal, with a hard deadline. Shutdown
    /// cancels the wait; the abandoned run is treated as a timeout.
    async fn await_run(&self, conversation_id: &str, run_id: &str) -> Result<(), ModelError> {
        let deadline = Instant::now() + self.run_timeout;

        loop {
            let response = self
                .request(
                    reqwest::Method::GET,
                    &format!("threads/{conversation_id}/runs/{run_id}"),
                )
                .send()
                .await
                .map_err(|e| ModelError::Request(e.to_string()))?;
            let response = check_status(response).await?;
            let run: RunStatus = response
                .json()
                .await
                .map_err(|e| ModelError::Request(format!("failed to parse run status: {e}")))?;

            debug!(run = %run_id, status = %run.status, "run status");
            match run.status.as_str() {
                "completed" => return Ok(()),
                "failed" | "cancelled" | "expired" => {
                    let detail = run
                        .last_error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| run.status.clone());
                    error!(run = %run_id, %detail, "run terminated without completion");
                    return Err(ModelError::RunFailed(detail));
                }
                // queued, in_progress, requires_action… keep waiting.
                _ => {}
            }

            if Instant::now() >= deadline {
                warn!(run = %run_id, timeout = ?self.run_timeout, "run wait deadline exceeded");
                return Err(ModelError::Timeout(self.run_timeout));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => {
                    warn!(run = %run_id, "shutdown requested while awaiting run");
                    return Err(ModelError::Timeout(self.run_timeout));
                }
            }
        }
    }

    async fn latest_assistant_text(&self, conversation_id: &str) -> Result<String, ModelError> {
        let listing = self.list_messages(conversation_id).await?;
        // Newest first on the wire; take the first assistant entry.
        listing
            .data
            .into_iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| text_of(&m))
            .ok_or_else(|| ModelError::Request("no assistant message in thread".into()))
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ModelError> {
        let listing = self.list_messages(conversation_id).await?;
        let mut entries: Vec<ChatMessage> = listing
            .data
            .iter()
            .filter_map(|m| {
                text_of(m).map(|content| ChatMessage {
                    role: m.role.clone(),
                    content,
                    created_at: m.created_at,
                })
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<MessageListing, ModelError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("threads/{conversation_id}/messages"),
            )
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ModelError::Request(format!("failed to parse message listing: {e}")))
    }

    /// Reachability probe with a hard 5-second timeout regardless of the
    /// configured request timeout. Any HTTP response counts as reachable.
    pub async fn ping(&self) -> Result<(), ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ModelError::Request(format!("failed to build ping client: {e}")))?;
        let mut req = client.get(format!("{}/models", self.api_base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| ModelError::Request(format!("unreachable: {e}")))
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ObjectWithId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunStatus {
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageListing {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextValue>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextValue {
    value: String,
}

/// First text block of a thread message, if any.
fn text_of(message: &ThreadMessage) -> Option<String> {
    message
        .content
        .iter()
        .find_map(|b| b.text.as_ref().map(|t| t.value.clone()))
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        format!("HTTP {status}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };
    error!(%status, %message, "model request returned HTTP error");
    Err(ModelError::Request(message))
}

// Error envelope used by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

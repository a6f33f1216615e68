//! Conversational-model client abstraction.
//!
//! `ModelClient` is an enum over concrete backends. The [`assistants`]
//! backend drives a threads/runs-style API over HTTP; the [`dummy`]
//! backend returns canned replies and records dispatches for tests.
//!
//! A round-trip blocks until the model run reaches a terminal state, a
//! configured deadline expires ([`ModelError::Timeout`]) or shutdown is
//! requested. A run the model itself reports as failed is
//! [`ModelError::RunFailed`] — the pipeline decides whether that aborts
//! the job or degrades to a placeholder reply.

pub mod assistants;
pub mod dummy;

use std::time::Duration;

use thiserror::Error;

pub use assistants::AssistantsClient;
pub use dummy::DummyModel;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport or protocol failure talking to the model API.
    #[error("model request failed: {0}")]
    Request(String),
    /// The run reached a terminal non-completed state.
    #[error("model run failed: {0}")]
    RunFailed(String),
    /// The run did not reach a terminal state within the ceiling.
    #[error("model run timed out after {0:?}")]
    Timeout(Duration),
}

/// One entry of a conversation's history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

// ── Client enum ───────────────────────────────────────────────────────────────

/// All available model backends.
#[derive(Debug, Clone)]
pub enum ModelClient {
    Assistants(AssistantsClient),
    Dummy(DummyModel),
}

impl ModelClient {
    /// Create a fresh conversation thread; returns its handle.
    pub async fn create_conversation(&self) -> Result<String, ModelError> {
        match self {
            ModelClient::Assistants(c) => c.create_conversation().await,
            ModelClient::Dummy(c) => c.create_conversation(),
        }
    }

    /// Text-only round-trip: append `text`, run, return the reply.
    pub async fn send_prompt(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<String, ModelError> {
        match self {
            ModelClient::Assistants(c) => c.send_prompt(conversation_id, text, &[]).await,
            ModelClient::Dummy(c) => c.send_prompt(conversation_id, text, &[]),
        }
    }

    /// Multimodal round-trip: `text` plus external image references.
    pub async fn send_prompt_with_images(
        &self,
        conversation_id: &str,
        text: &str,
        image_urls: &[String],
    ) -> Result<String, ModelError> {
        match self {
            ModelClient::Assistants(c) => c.send_prompt(conversation_id, text, image_urls).await,
            ModelClient::Dummy(c) => c.send_prompt(conversation_id, text, image_urls),
        }
    }

    /// Conversation history, oldest first.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ModelError> {
        match self {
            ModelClient::Assistants(c) => c.history(conversation_id).await,
            ModelClient::Dummy(c) => c.history(conversation_id),
        }
    }

    /// Lightweight reachability probe.
    pub async fn ping(&self) -> Result<(), ModelError> {
        match self {
            ModelClient::Assistants(c) => c.ping().await,
            ModelClient::Dummy(_) => Ok(()),
        }
    }
}

//! Document-store adapter — typed access to the `users` and `Messages`
//! collections. No business logic lives here.
//!
//! `Store` is an enum over concrete backends, mirroring the provider-enum
//! pattern used elsewhere in the crate: no `dyn` trait objects, no
//! `async-trait`. The [`firebase`] backend talks to an RTDB-style REST
//! store; the [`memory`] backend is an in-process fake used by tests.
//!
//! The store offers no transactions and no conditional writes — every
//! patch is an independent write, and callers own idempotence across
//! partial completion.

pub mod firebase;
pub mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store response malformed: {0}")]
    Decode(String),
}

// ── Records ───────────────────────────────────────────────────────────────────

/// Flat user record as stored in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    /// Opaque handle to the model-side conversation thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Handle of the outstanding deferred job, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job: Option<String>,
}

/// Flat message record as stored in the `Messages` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub user_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    /// `false` until the message has been folded into a model reply.
    /// Transitions `false → true`, never back.
    pub is_answer: bool,
    /// `true` for model-authored messages (always created answered).
    pub is_bot: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// A user together with its store-assigned key.
#[derive(Debug, Clone)]
pub struct User {
    pub key: String,
    pub record: UserRecord,
}

/// A message together with its store-assigned key. Keys are
/// chronologically sortable, so `(created_at, key)` is a stable order.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub key: String,
    pub record: MessageRecord,
}

// ── Store enum ────────────────────────────────────────────────────────────────

/// All available store backends.
#[derive(Debug, Clone)]
pub enum Store {
    Firebase(FirebaseStore),
    Memory(MemoryStore),
}

impl Store {
    /// Look up a user by the `userId` field. Returns `None` when no
    /// record matches.
    pub async fn user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        match self {
            Store::Firebase(s) => s.user(user_id).await,
            Store::Memory(s) => s.user(user_id),
        }
    }

    /// All messages belonging to `user_id`, unordered and unfiltered.
    /// The aggregator owns pending-filtering and ordering.
    pub async fn messages_for(&self, user_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        match self {
            Store::Firebase(s) => s.messages_for(user_id).await,
            Store::Memory(s) => s.messages_for(user_id),
        }
    }

    /// Append a message record; returns the store-assigned key.
    pub async fn create_message(&self, record: &MessageRecord) -> Result<String, StoreError> {
        match self {
            Store::Firebase(s) => s.create_message(record).await,
            Store::Memory(s) => s.create_message(record),
        }
    }

    /// Patch a single message's `isAnswer` to `true`. Idempotent.
    pub async fn mark_answered(&self, message_key: &str) -> Result<(), StoreError> {
        match self {
            Store::Firebase(s) => s.mark_answered(message_key).await,
            Store::Memory(s) => s.mark_answered(message_key),
        }
    }

    /// Patch a user's `activeJob` to `handle`.
    pub async fn set_active_job(&self, user_key: &str, handle: &str) -> Result<(), StoreError> {
        match self {
            Store::Firebase(s) => s.set_active_job(user_key, handle).await,
            Store::Memory(s) => s.set_active_job(user_key, Some(handle.to_string())),
        }
    }

    /// Clear a user's `activeJob` field.
    pub async fn clear_active_job(&self, user_key: &str) -> Result<(), StoreError> {
        match self {
            Store::Firebase(s) => s.clear_active_job(user_key).await,
            Store::Memory(s) => s.set_active_job(user_key, None),
        }
    }
}

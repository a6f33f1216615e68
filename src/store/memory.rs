//! In-process store backend.
//!
//! Backs unit and integration tests; keeps the same record shapes and the
//! same key-ordering property as the REST backend (UUIDv7 keys are
//! time-ordered, like the real store's push keys). Clones share state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{MessageRecord, StoredMessage, StoreError, User, UserRecord};

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<String, UserRecord>,
    messages: BTreeMap<String, MessageRecord>,
}

/// Shared in-memory store. All operations are infallible in practice;
/// the `Result` signatures match the REST backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    key_seq: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push-key analogue: a monotonic sequence prefix keeps keys
    /// insertion-ordered (UUIDv7 alone only orders across milliseconds),
    /// the UUID suffix keeps them globally unique.
    fn push_key(&self) -> String {
        let seq = self.key_seq.fetch_add(1, Ordering::Relaxed);
        format!("{seq:012}-{}", Uuid::now_v7().simple())
    }

    pub fn user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .users
            .iter()
            .find(|(_, r)| r.user_id == user_id)
            .map(|(key, record)| User { key: key.clone(), record: record.clone() }))
    }

    pub fn messages_for(&self, user_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .messages
            .iter()
            .filter(|(_, r)| r.user_id == user_id)
            .map(|(key, record)| StoredMessage { key: key.clone(), record: record.clone() })
            .collect())
    }

    pub fn create_message(&self, record: &MessageRecord) -> Result<String, StoreError> {
        let key = self.push_key();
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.messages.insert(key.clone(), record.clone());
        Ok(key)
    }

    pub fn mark_answered(&self, message_key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        match inner.messages.get_mut(message_key) {
            Some(record) => {
                record.is_answer = true;
                Ok(())
            }
            None => Err(StoreError::Request(format!(
                "no message with key {message_key}"
            ))),
        }
    }

    pub fn set_active_job(&self, user_key: &str, handle: Option<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        match inner.users.get_mut(user_key) {
            Some(record) => {
                record.active_job = handle;
                Ok(())
            }
            None => Err(StoreError::Request(format!("no user with key {user_key}"))),
        }
    }

    // ── test seeding / inspection ─────────────────────────────────────────

    /// Insert a user record; returns its store key.
    pub fn seed_user(&self, record: UserRecord) -> String {
        let key = self.push_key();
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.users.insert(key.clone(), record);
        key
    }

    /// Insert a message record; returns its store key.
    pub fn seed_message(&self, record: MessageRecord) -> String {
        self.create_message(&record).expect("memory create is infallible")
    }

    /// Fetch a single message by key.
    pub fn message(&self, key: &str) -> Option<StoredMessage> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .messages
            .get(key)
            .map(|record| StoredMessage { key: key.to_string(), record: record.clone() })
    }

    /// Total message count across all users.
    pub fn message_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").messages.len()
    }
}

//! Delayed-callback queue adapter.
//!
//! A job is a future HTTP POST of `{"userId": ...}` to a fixed callback
//! address, identified by a caller-supplied deterministic key. Delivery
//! is at-least-once and unordered across users; retry/backoff on non-2xx
//! responses belongs to the queue infrastructure, not this adapter.
//!
//! `DelayedQueue` is an enum over backends, same shape as [`Store`].
//!
//! [`Store`]: crate::store::Store

pub mod cloud_tasks;
pub mod memory;

use std::time::Duration;

use thiserror::Error;

pub use cloud_tasks::CloudTasksQueue;
pub use memory::MemoryQueue;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with this key already exists; carries the existing handle.
    /// Callers racing on the same deterministic key treat this as success.
    #[error("job already exists: {0}")]
    AlreadyExists(String),
    #[error("queue request failed: {0}")]
    Request(String),
}

// ── Queue enum ────────────────────────────────────────────────────────────────

/// All available queue backends.
#[derive(Debug, Clone)]
pub enum DelayedQueue {
    CloudTasks(CloudTasksQueue),
    Memory(MemoryQueue),
}

impl DelayedQueue {
    /// Create a delayed callback job under `key`, firing at-or-after
    /// `now + delay` with payload `{"userId": user_id}`. Returns the
    /// job handle.
    pub async fn create(
        &self,
        key: &str,
        user_id: &str,
        delay: Duration,
    ) -> Result<String, QueueError> {
        match self {
            DelayedQueue::CloudTasks(q) => q.create(key, user_id, delay).await,
            DelayedQueue::Memory(q) => q.create(key, user_id, delay),
        }
    }

    /// Delete a job by handle. Returns `false` when the job was already
    /// gone — deleting an absent key is not an error.
    pub async fn delete(&self, handle: &str) -> Result<bool, QueueError> {
        match self {
            DelayedQueue::CloudTasks(q) => q.delete(handle).await,
            DelayedQueue::Memory(q) => q.delete(handle),
        }
    }
}

//! In-process queue backend.
//!
//! Records scheduled jobs without firing them — tests drive the callback
//! path directly. The job handle is the key itself, so the same
//! already-exists and already-gone semantics hold as on the real queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::QueueError;

/// A job sitting in the in-memory queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub user_id: String,
    pub delay: Duration,
}

/// Shared in-memory queue. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    jobs: Arc<Mutex<HashMap<String, QueuedJob>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, key: &str, user_id: &str, delay: Duration) -> Result<String, QueueError> {
        let mut jobs = self.jobs.lock().expect("queue mutex poisoned");
        if jobs.contains_key(key) {
            return Err(QueueError::AlreadyExists(key.to_string()));
        }
        jobs.insert(key.to_string(), QueuedJob { user_id: user_id.to_string(), delay });
        Ok(key.to_string())
    }

    pub fn delete(&self, handle: &str) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.lock().expect("queue mutex poisoned");
        Ok(jobs.remove(handle).is_some())
    }

    // ── test inspection ───────────────────────────────────────────────────

    pub fn job(&self, key: &str) -> Option<QueuedJob> {
        self.jobs.lock().expect("queue mutex poisoned").get(key).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("queue mutex poisoned").len()
    }
}

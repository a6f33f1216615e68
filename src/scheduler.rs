//! Task scheduling — at most one outstanding deferred job per user.
//!
//! The invariant is enforced cooperatively, not by a lock: a check of
//! the stored `activeJob` field first, backed by a deterministic job key
//! at the queue as the second line of defense. The store offers no
//! conditional writes, so two concurrent `schedule` calls can both pass
//! the check; the key collision then resolves the race at the queue and
//! both callers receive the same handle. This is best-effort, not
//! linearizable mutual exclusion.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::AppError;
use crate::queue::{DelayedQueue, QueueError};
use crate::store::Store;

/// Deterministic job key for a user. Re-scheduling the same user always
/// lands on the same key, making creation idempotent at the queue level.
pub fn job_key(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    format!("answer-{}", hex::encode(&digest[..8]))
}

/// Creates and cancels deferred jobs, recording the handle on the user.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    store: Store,
    queue: DelayedQueue,
}

impl TaskScheduler {
    pub fn new(store: Store, queue: DelayedQueue) -> Self {
        Self { store, queue }
    }

    /// Arrange a callback for `user_id` after `delay`. Idempotent: when a
    /// job is already outstanding, the existing handle is returned and no
    /// second job is created.
    pub async fn schedule(&self, user_id: &str, delay: Duration) -> Result<String, AppError> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| AppError::Validation(format!("unknown user: {user_id}")))?;

        if let Some(handle) = user.record.active_job {
            debug!(%user_id, %handle, "job already scheduled");
            return Ok(handle);
        }

        let key = job_key(user_id);
        let handle = match self.queue.create(&key, user_id, delay).await {
            Ok(handle) => handle,
            // Benign race between the check above and creation: another
            // schedule call won, and the deterministic key names its job.
            Err(QueueError::AlreadyExists(existing)) => {
                debug!(%user_id, handle = %existing, "job creation raced, adopting existing");
                existing
            }
            Err(e) => return Err(e.into()),
        };

        self.store.set_active_job(&user.key, &handle).await?;
        info!(%user_id, %handle, delay_secs = delay.as_secs(), "job scheduled");
        Ok(handle)
    }

    /// Cancel the user's outstanding job, if any. Returns `false` when no
    /// job was recorded; repeated cancels are no-ops.
    pub async fn cancel(&self, user_id: &str) -> Result<bool, AppError> {
        let Some(user) = self.store.user(user_id).await? else {
            return Ok(false);
        };
        let Some(handle) = user.record.active_job else {
            return Ok(false);
        };

        // An absent job at the queue is already-satisfied, not an error.
        let deleted = self.queue.delete(&handle).await?;
        self.store.clear_active_job(&user.key).await?;
        info!(%user_id, %handle, %deleted, "job cancelled");
        Ok(true)
    }
}

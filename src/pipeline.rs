//! Answer pipeline — the orchestrator a fired deferred job runs through.
//!
//! `run_job` is a linear sequence:
//!
//! `Fetch → (empty: Done) → Combine → ResolveConversation → Dispatch →
//! Persist → Mark → Release → Notify`
//!
//! An error anywhere before Notify aborts the remaining steps and
//! surfaces to the invoking callback; the queue's own retry policy owns
//! what happens next. Already-applied writes stay applied — the store has
//! no transactions — so every mutating step is idempotent and a re-run
//! over an already-processed batch resolves to the empty no-op path.
//! Notify failures are logged and swallowed.
//!
//! Duplicate concurrent invocation for the same user is tolerated, not
//! excluded: a second run racing ahead of Mark can recompute an
//! overlapping batch and produce a duplicate reply. That is the accepted
//! at-least-once risk of the queue contract.

use chrono::Utc;
use tracing::{info, warn};

use crate::aggregate::{Aggregator, CombinedPrompt, combine};
use crate::error::AppError;
use crate::model::{ModelClient, ModelError};
use crate::notify::Notifier;
use crate::scheduler::TaskScheduler;
use crate::store::{MessageRecord, Store};

/// Sentinel reply substituted when the model run reports failure under
/// the placeholder policy.
pub const PLACEHOLDER_REPLY: &str = "Failed response";

/// What to do when the model run itself fails (transport failures and
/// timeouts always abort).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnModelFailure {
    /// Substitute [`PLACEHOLDER_REPLY`] and drain the batch anyway —
    /// liveness over answer quality.
    Placeholder,
    /// Fail the job; the queue retries the whole batch.
    Abort,
}

/// How a job run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Nothing pending — no mutation, job bookkeeping untouched.
    EmptyBatch,
    /// A reply was persisted and the batch drained.
    Answered { reply: String, consumed: usize },
}

/// Composes aggregator, model client, store, scheduler and notifier into
/// the end-to-end job run.
#[derive(Debug, Clone)]
pub struct AnswerPipeline {
    store: Store,
    aggregator: Aggregator,
    model: ModelClient,
    scheduler: TaskScheduler,
    notifier: Option<Notifier>,
    on_model_failure: OnModelFailure,
}

impl AnswerPipeline {
    pub fn new(
        store: Store,
        model: ModelClient,
        scheduler: TaskScheduler,
        notifier: Option<Notifier>,
        on_model_failure: OnModelFailure,
    ) -> Self {
        let aggregator = Aggregator::new(store.clone());
        Self { store, aggregator, model, scheduler, notifier, on_model_failure }
    }

    /// Entry point for the queue callback.
    pub async fn run_job(&self, user_id: &str) -> Result<JobOutcome, AppError> {
        // Fetch. An empty batch ends the job without mutation; a stale
        // activeJob stays behind for a later run or explicit cancel.
        let pending = self.aggregator.fetch_pending(user_id).await?;
        if pending.is_empty() {
            info!(%user_id, "no pending messages, job is a no-op");
            return Ok(JobOutcome::EmptyBatch);
        }

        let prompt = combine(&pending);

        // ResolveConversation. Abort with bookkeeping untouched so the
        // job stays retryable once the handle exists.
        let conversation_id = self
            .store
            .user(user_id)
            .await?
            .and_then(|u| u.record.conversation_id)
            .ok_or_else(|| AppError::UnresolvedConversation(user_id.to_string()))?;

        let reply = self.dispatch(&conversation_id, &prompt).await?;

        // Persist the bot answer before marking, so a crash in between
        // re-answers rather than silently dropping the batch.
        let record = MessageRecord {
            user_id: user_id.to_string(),
            body: reply.clone(),
            attachment_url: None,
            is_answer: true,
            is_bot: true,
            created_at: Utc::now().timestamp_millis(),
        };
        self.store.create_message(&record).await?;

        // Mark. Entries already answered by a racing run are left alone.
        for message in &pending {
            if !message.record.is_answer {
                self.store.mark_answered(&message.key).await?;
            }
        }

        // Release the deferred job.
        self.scheduler.cancel(user_id).await?;

        // Notify, best-effort.
        if let Some(notifier) = &self.notifier {
            if notifier.routes(user_id) {
                if let Err(e) = notifier.push(user_id, &reply).await {
                    warn!(%user_id, error = %e, "notify failed, ignoring");
                }
            }
        }

        info!(%user_id, consumed = pending.len(), "job completed");
        Ok(JobOutcome::Answered { reply, consumed: pending.len() })
    }

    /// One model round-trip; multimodal entry point when any attachment
    /// is present. A failed run degrades to the placeholder only under
    /// the placeholder policy — timeouts and transport errors always
    /// abort, since the run may still complete server-side.
    async fn dispatch(
        &self,
        conversation_id: &str,
        prompt: &CombinedPrompt,
    ) -> Result<String, AppError> {
        let result = if prompt.attachment_urls.is_empty() {
            self.model.send_prompt(conversation_id, &prompt.text).await
        } else {
            self.model
                .send_prompt_with_images(conversation_id, &prompt.text, &prompt.attachment_urls)
                .await
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(ModelError::RunFailed(detail))
                if self.on_model_failure == OnModelFailure::Placeholder =>
            {
                warn!(%conversation_id, %detail, "model run failed, substituting placeholder");
                Ok(PLACEHOLDER_REPLY.to_string())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DummyModel;
    use crate::queue::{DelayedQueue, MemoryQueue};
    use crate::store::{MemoryStore, UserRecord};

    fn pipeline_with(
        model: DummyModel,
        policy: OnModelFailure,
    ) -> (AnswerPipeline, MemoryStore) {
        let store = MemoryStore::new();
        store.seed_user(UserRecord {
            user_id: "u1".into(),
            conversation_id: Some("c1".into()),
            active_job: None,
        });
        let scheduler = TaskScheduler::new(
            Store::Memory(store.clone()),
            DelayedQueue::Memory(MemoryQueue::new()),
        );
        let pipeline = AnswerPipeline::new(
            Store::Memory(store.clone()),
            ModelClient::Dummy(model),
            scheduler,
            None,
            policy,
        );
        (pipeline, store)
    }

    fn seed_pending(store: &MemoryStore, body: &str, created_at: i64) -> String {
        store.seed_message(MessageRecord {
            user_id: "u1".into(),
            body: body.into(),
            attachment_url: None,
            is_answer: false,
            is_bot: false,
            created_at,
        })
    }

    #[tokio::test]
    async fn placeholder_policy_drains_batch_on_run_failure() {
        let (pipeline, store) = pipeline_with(DummyModel::failing(), OnModelFailure::Placeholder);
        let key = seed_pending(&store, "hello", 1);

        let outcome = pipeline.run_job("u1").await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Answered { reply: PLACEHOLDER_REPLY.into(), consumed: 1 }
        );
        assert!(store.message(&key).unwrap().record.is_answer);
        // The placeholder itself was persisted as a bot message.
        assert_eq!(store.message_count(), 2);
    }

    #[tokio::test]
    async fn abort_policy_fails_job_and_leaves_batch_pending() {
        let (pipeline, store) = pipeline_with(DummyModel::failing(), OnModelFailure::Abort);
        let key = seed_pending(&store, "hello", 1);

        let err = pipeline.run_job("u1").await.unwrap_err();
        assert!(matches!(err, AppError::ModelRun(_)));
        assert!(!store.message(&key).unwrap().record.is_answer);
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn missing_conversation_aborts_without_mutation() {
        let store = MemoryStore::new();
        store.seed_user(UserRecord {
            user_id: "u1".into(),
            conversation_id: None,
            active_job: Some("job-1".into()),
        });
        let key = seed_pending(&store, "hello", 1);
        let scheduler = TaskScheduler::new(
            Store::Memory(store.clone()),
            DelayedQueue::Memory(MemoryQueue::new()),
        );
        let pipeline = AnswerPipeline::new(
            Store::Memory(store.clone()),
            ModelClient::Dummy(DummyModel::new()),
            scheduler,
            None,
            OnModelFailure::Placeholder,
        );

        let err = pipeline.run_job("u1").await.unwrap_err();
        assert!(matches!(err, AppError::UnresolvedConversation(_)));
        assert!(!store.message(&key).unwrap().record.is_answer);
        // Job bookkeeping untouched — still retryable.
        assert_eq!(
            store.user("u1").unwrap().unwrap().record.active_job.as_deref(),
            Some("job-1")
        );
    }

    #[tokio::test]
    async fn rerun_over_processed_batch_is_noop() {
        let (pipeline, store) = pipeline_with(DummyModel::new(), OnModelFailure::Placeholder);
        seed_pending(&store, "hello", 1);

        pipeline.run_job("u1").await.unwrap();
        let count_after_first = store.message_count();

        let outcome = pipeline.run_job("u1").await.unwrap();
        assert_eq!(outcome, JobOutcome::EmptyBatch);
        assert_eq!(store.message_count(), count_after_first);
    }
}

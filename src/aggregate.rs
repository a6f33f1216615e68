//! Message aggregation — collect a user's pending messages and fold them
//! into a single prompt.
//!
//! Ordering is `createdAt` ascending with ties broken by store key.
//! Store keys are chronologically assigned, so the order is stable and
//! deterministic across runs. `fetch_pending` returns a finite snapshot,
//! not a live stream.

use crate::store::{Store, StoredMessage, StoreError};

/// The result of folding a batch into one model prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedPrompt {
    pub text: String,
    /// Attachment URLs in message order; absent values skipped.
    pub attachment_urls: Vec<String>,
}

/// Reads pending messages and combines them. No mutation happens here.
#[derive(Debug, Clone)]
pub struct Aggregator {
    store: Store,
}

impl Aggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Snapshot of the user's unanswered messages, in aggregation order.
    pub async fn fetch_pending(&self, user_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let mut pending: Vec<StoredMessage> = self
            .store
            .messages_for(user_id)
            .await?
            .into_iter()
            .filter(|m| !m.record.is_answer)
            .collect();
        pending.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(pending)
    }
}

/// Fold messages into one prompt: each body as a quoted block, joined by
/// a blank line. Callers must check for an empty batch before dispatch.
pub fn combine(messages: &[StoredMessage]) -> CombinedPrompt {
    let text = messages
        .iter()
        .map(|m| format!("\"{}\"", m.record.body))
        .collect::<Vec<_>>()
        .join("\n\n");
    let attachment_urls = messages
        .iter()
        .filter_map(|m| m.record.attachment_url.clone())
        .collect();
    CombinedPrompt { text, attachment_urls }
}

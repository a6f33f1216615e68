//! Canned-reply model backend for tests.
//!
//! Records every dispatch so tests can assert which entry point was hit
//! and with what prompt. Clones share state.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ChatMessage, ModelError};

/// One recorded dispatch.
#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub conversation_id: String,
    pub text: String,
    pub image_urls: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<DispatchCall>,
}

/// Test double with a fixed reply and optional forced run failure.
#[derive(Debug, Clone)]
pub struct DummyModel {
    reply: String,
    fail_runs: bool,
    inner: Arc<Mutex<Inner>>,
    conversation_seq: Arc<AtomicU64>,
}

impl DummyModel {
    pub fn new() -> Self {
        Self::with_reply("dummy reply")
    }

    pub fn with_reply(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_runs: false,
            inner: Arc::default(),
            conversation_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every dispatch report a failed run.
    pub fn failing() -> Self {
        Self { fail_runs: true, ..Self::new() }
    }

    pub fn create_conversation(&self) -> Result<String, ModelError> {
        let n = self.conversation_seq.fetch_add(1, Ordering::Relaxed);
        Ok(format!("conv-{n}"))
    }

    pub fn send_prompt(
        &self,
        conversation_id: &str,
        text: &str,
        image_urls: &[String],
    ) -> Result<String, ModelError> {
        self.inner
            .lock()
            .expect("dummy mutex poisoned")
            .calls
            .push(DispatchCall {
                conversation_id: conversation_id.to_string(),
                text: text.to_string(),
                image_urls: image_urls.to_vec(),
            });
        if self.fail_runs {
            return Err(ModelError::RunFailed("dummy run failure".into()));
        }
        Ok(self.reply.clone())
    }

    pub fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ModelError> {
        let inner = self.inner.lock().expect("dummy mutex poisoned");
        Ok(inner
            .calls
            .iter()
            .filter(|c| c.conversation_id == conversation_id)
            .enumerate()
            .map(|(i, c)| ChatMessage {
                role: "user".to_string(),
                content: c.text.clone(),
                created_at: i as i64,
            })
            .collect())
    }

    /// All dispatches recorded so far.
    pub fn calls(&self) -> Vec<DispatchCall> {
        self.inner.lock().expect("dummy mutex poisoned").calls.clone()
    }
}

impl Default for DummyModel {
    fn default() -> Self {
        Self::new()
    }
}

//! Application-wide error types.
//!
//! Adapter modules define their own error enums ([`StoreError`],
//! [`QueueError`], [`ModelError`]); this module owns the taxonomy the
//! scheduler, pipeline and HTTP layer speak. The distinction that matters
//! at the top level is *who acts next*: the caller fixes a [`Validation`]
//! error, upstream fixes an [`UnresolvedConversation`], and the queue's
//! retry policy owns everything else.
//!
//! [`Validation`]: AppError::Validation
//! [`UnresolvedConversation`]: AppError::UnresolvedConversation
//! [`StoreError`]: crate::store::StoreError
//! [`QueueError`]: crate::queue::QueueError
//! [`ModelError`]: crate::model::ModelError

use std::time::Duration;

use thiserror::Error;

use crate::model::ModelError;
use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input; rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// The user has no conversation handle yet. The job aborts without
    /// mutation and is safe to retry once the handle exists.
    #[error("no conversation handle for user {0}")]
    UnresolvedConversation(String),

    /// Store, queue or model transport failure. The job aborts at the
    /// failing step; already-applied writes stay applied.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// The model run itself reported failure. Escalated only when the
    /// pipeline runs with the `abort` policy.
    #[error("model run failed: {0}")]
    ModelRun(String),

    /// The model run did not reach a terminal state within the ceiling.
    #[error("model run timed out after {0:?}")]
    Timeout(Duration),

    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

impl From<ModelError> for AppError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::RunFailed(msg) => AppError::ModelRun(msg),
            ModelError::Timeout(d) => AppError::Timeout(d),
            ModelError::Request(msg) => AppError::Upstream(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn validation_error_display() {
        let e = AppError::Validation("missing userId".into());
        assert!(e.to_string().contains("missing userId"));
    }

    #[test]
    fn unresolved_conversation_names_user() {
        let e = AppError::UnresolvedConversation("u1".into());
        assert!(e.to_string().contains("u1"));
    }

    #[test]
    fn model_errors_map_to_distinct_kinds() {
        let run: AppError = ModelError::RunFailed("bad run".into()).into();
        assert!(matches!(run, AppError::ModelRun(_)));

        let timeout: AppError = ModelError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(timeout, AppError::Timeout(_)));

        let transport: AppError = ModelError::Request("connection refused".into()).into();
        assert!(matches!(transport, AppError::Upstream(_)));
    }

    #[test]
    fn satisfies_error_trait() {
        let e = AppError::Config("missing field".into());
        let _: &dyn Error = &e;
    }
}

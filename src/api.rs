//! Axum handlers for the service endpoints.
//!
//! Handlers are thin request/response mapping: decode the payload, call
//! the core, translate [`AppError`] into a status code. The callback
//! endpoint must answer 2xx on pipeline completion (including the
//! empty-batch no-op) — anything else triggers the queue's retry policy.

use std::future::Future;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::AppError;
use crate::model::ModelClient;
use crate::pipeline::AnswerPipeline;
use crate::scheduler::TaskScheduler;

/// Ceiling on schedule/cancel and other single-round-trip core calls.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
/// Ceiling on a full pipeline run — must exceed the model run ceiling.
const JOB_TIMEOUT: Duration = Duration::from_secs(300);
/// Ceiling on direct model round-trips outside the pipeline.
const MODEL_TIMEOUT: Duration = Duration::from_secs(180);

/// Shared handler state. Everything inside is cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: TaskScheduler,
    pub pipeline: AnswerPipeline,
    pub model: ModelClient,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/schedule-answer", post(schedule_answer))
        .route("/cancel-answer", post(cancel_answer))
        .route("/tasks/answer-job", post(answer_job))
        .route("/create-thread", post(create_thread))
        .route("/send-message", post(send_message))
        .route("/get-messages/{thread_id}", get(get_messages))
        .route("/health", get(health))
        .with_state(state)
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ScheduleRequest {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "delaySeconds")]
    delay_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct UserIdPayload {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    #[serde(rename = "threadId")]
    thread_id: String,
    message: String,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

/// Status-code mapping for the error taxonomy. Everything retryable by
/// the queue is non-2xx and ≥ 500.
fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AppError::Upstream(_) | AppError::ModelRun(_) => StatusCode::BAD_GATEWAY,
        AppError::UnresolvedConversation(_)
        | AppError::Config(_)
        | AppError::Logger(_)
        | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &AppError) -> Response {
    let code = match err {
        AppError::Validation(_) => "validation",
        AppError::Timeout(_) => "timeout",
        AppError::UnresolvedConversation(_) => "unresolved_conversation",
        AppError::ModelRun(_) => "model_run_failed",
        _ => "upstream",
    };
    (status_for(err), json_error(code, err)).into_response()
}

/// Bound a core call so a stuck upstream cannot hold the handler (and,
/// for the callback, the queue's dispatch slot) open indefinitely.
async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(limit)),
    }
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, Response> {
    match value.as_deref().filter(|s| !s.is_empty()) {
        Some(v) => Ok(v),
        None => Err((
            StatusCode::BAD_REQUEST,
            json_error("validation", format!("missing '{field}' in request body")),
        )
            .into_response()),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// POST /schedule-answer
async fn schedule_answer(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Response {
    let user_id = match required("userId", &req.user_id) {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    let Some(delay_seconds) = req.delay_seconds else {
        return (
            StatusCode::BAD_REQUEST,
            json_error("validation", "missing 'delaySeconds' in request body"),
        )
            .into_response();
    };

    match with_timeout(
        CONTROL_TIMEOUT,
        state
            .scheduler
            .schedule(&user_id, Duration::from_secs(delay_seconds)),
    )
    .await
    {
        Ok(handle) => (StatusCode::OK, Json(json!({ "jobHandle": handle }))).into_response(),
        Err(e) => {
            warn!(%user_id, "schedule failed: {e}");
            error_response(&e)
        }
    }
}

/// POST /cancel-answer
async fn cancel_answer(
    State(state): State<AppState>,
    Json(req): Json<UserIdPayload>,
) -> Response {
    let user_id = match required("userId", &req.user_id) {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };

    match with_timeout(CONTROL_TIMEOUT, state.scheduler.cancel(&user_id)).await {
        Ok(cancelled) => {
            (StatusCode::OK, Json(json!({ "cancelled": cancelled }))).into_response()
        }
        Err(e) => {
            warn!(%user_id, "cancel failed: {e}");
            error_response(&e)
        }
    }
}

/// POST /tasks/answer-job — invoked by the queue infrastructure only.
async fn answer_job(State(state): State<AppState>, Json(req): Json<UserIdPayload>) -> Response {
    let user_id = match required("userId", &req.user_id) {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };

    match with_timeout(JOB_TIMEOUT, state.pipeline.run_job(&user_id)).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "done" }))).into_response(),
        Err(e) => {
            warn!(%user_id, "answer job failed: {e}");
            error_response(&e)
        }
    }
}

/// POST /create-thread
async fn create_thread(State(state): State<AppState>) -> Response {
    let call = async { state.model.create_conversation().await.map_err(AppError::from) };
    match with_timeout(CONTROL_TIMEOUT, call).await {
        Ok(thread_id) => (StatusCode::OK, Json(json!({ "threadId": thread_id }))).into_response(),
        Err(e) => {
            warn!("thread creation failed: {e}");
            error_response(&e)
        }
    }
}

/// POST /send-message — immediate round-trip, bypassing the deferred
/// pipeline.
async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let call = async {
        state
            .model
            .send_prompt(&req.thread_id, &req.message)
            .await
            .map_err(AppError::from)
    };
    match with_timeout(MODEL_TIMEOUT, call).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!({ "threadId": req.thread_id, "message": reply })),
        )
            .into_response(),
        Err(e) => {
            warn!(thread_id = %req.thread_id, "send failed: {e}");
            error_response(&e)
        }
    }
}

/// GET /get-messages/{thread_id}
async fn get_messages(State(state): State<AppState>, Path(thread_id): Path<String>) -> Response {
    let call = async { state.model.history(&thread_id).await.map_err(AppError::from) };
    match with_timeout(CONTROL_TIMEOUT, call).await {
        Ok(messages) => (
            StatusCode::OK,
            Json(json!({ "threadId": thread_id, "messages": messages })),
        )
            .into_response(),
        Err(e) => {
            warn!(%thread_id, "history fetch failed: {e}");
            error_response(&e)
        }
    }
}

/// GET /health — model reachability probe.
async fn health(State(state): State<AppState>) -> Response {
    let call = async { state.model.ping().await.map_err(AppError::from) };
    match with_timeout(CONTROL_TIMEOUT, call).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "reachable" }))).into_response(),
        Err(e) => {
            warn!("health probe failed: {e}");
            error_response(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::model::DummyModel;
    use crate::pipeline::OnModelFailure;
    use crate::queue::{DelayedQueue, MemoryQueue};
    use crate::store::{MemoryStore, MessageRecord, Store, UserRecord};

    fn test_router() -> (Router, MemoryStore, MemoryQueue) {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let model = ModelClient::Dummy(DummyModel::with_reply("hi there"));
        let scheduler = TaskScheduler::new(
            Store::Memory(store.clone()),
            DelayedQueue::Memory(queue.clone()),
        );
        let pipeline = AnswerPipeline::new(
            Store::Memory(store.clone()),
            model.clone(),
            scheduler.clone(),
            None,
            OnModelFailure::Placeholder,
        );
        let router = router(AppState { scheduler, pipeline, model });
        (router, store, queue)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn schedule_answer_returns_job_handle() {
        let (router, store, queue) = test_router();
        store.seed_user(UserRecord {
            user_id: "u1".into(),
            conversation_id: Some("c1".into()),
            active_job: None,
        });

        let response = router
            .oneshot(post_json(
                "/schedule-answer",
                json!({ "userId": "u1", "delaySeconds": 30 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["jobHandle"].as_str().is_some());
        assert_eq!(queue.job_count(), 1);
    }

    #[tokio::test]
    async fn schedule_answer_missing_user_is_400() {
        let (router, _, _) = test_router();
        let response = router
            .oneshot(post_json("/schedule-answer", json!({ "delaySeconds": 30 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn schedule_answer_unknown_user_is_400() {
        let (router, _, _) = test_router();
        let response = router
            .oneshot(post_json(
                "/schedule-answer",
                json!({ "userId": "nobody", "delaySeconds": 30 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_completes_and_answers_done() {
        let (router, store, _) = test_router();
        store.seed_user(UserRecord {
            user_id: "u1".into(),
            conversation_id: Some("c1".into()),
            active_job: None,
        });
        store.seed_message(MessageRecord {
            user_id: "u1".into(),
            body: "hello".into(),
            attachment_url: None,
            is_answer: false,
            is_bot: false,
            created_at: 1,
        });

        let response = router
            .oneshot(post_json("/tasks/answer-job", json!({ "userId": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "done");
    }

    #[tokio::test]
    async fn callback_empty_batch_is_still_2xx() {
        let (router, store, _) = test_router();
        store.seed_user(UserRecord {
            user_id: "u2".into(),
            conversation_id: Some("c2".into()),
            active_job: None,
        });

        let response = router
            .oneshot(post_json("/tasks/answer-job", json!({ "userId": "u2" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn callback_missing_user_id_is_400() {
        let (router, _, _) = test_router();
        let response = router
            .oneshot(post_json("/tasks/answer-job", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_unresolved_conversation_is_retryable_5xx() {
        let (router, store, _) = test_router();
        store.seed_user(UserRecord {
            user_id: "u1".into(),
            conversation_id: None,
            active_job: None,
        });
        store.seed_message(MessageRecord {
            user_id: "u1".into(),
            body: "hello".into(),
            attachment_url: None,
            is_answer: false,
            is_bot: false,
            created_at: 1,
        });

        let response = router
            .oneshot(post_json("/tasks/answer-job", json!({ "userId": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cancel_answer_reports_flag() {
        let (router, store, _) = test_router();
        store.seed_user(UserRecord {
            user_id: "u1".into(),
            conversation_id: Some("c1".into()),
            active_job: None,
        });

        let response = router
            .oneshot(post_json("/cancel-answer", json!({ "userId": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cancelled"], false);
    }

    #[tokio::test]
    async fn create_thread_returns_handle() {
        let (router, _, _) = test_router();
        let response = router
            .oneshot(post_json("/create-thread", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["threadId"].as_str().is_some());
    }

    #[tokio::test]
    async fn stalled_core_call_times_out() {
        let limit = Duration::from_millis(10);
        let result: Result<(), AppError> =
            with_timeout(limit, std::future::pending()).await;
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Timeout(d) if d == limit));
        assert_eq!(status_for(&err), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn timeout_error_response_is_504() {
        let response = error_response(&AppError::Timeout(Duration::from_secs(10)));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"], "timeout");
    }

    #[tokio::test]
    async fn health_is_ok_with_dummy_model() {
        let (router, _, _) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

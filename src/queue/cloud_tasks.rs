//! Cloud Tasks v2 REST backend for the delayed-callback queue.
//!
//! The task name doubles as the idempotency key: creating a task whose
//! name already exists answers 409, which the adapter surfaces as
//! [`QueueError::AlreadyExists`] with the (deterministic) handle, and
//! deleting an absent task answers 404, which is reported as
//! already-satisfied. Wire types are private to this module.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::QueueError;

/// REST adapter over a Cloud Tasks queue.
#[derive(Debug, Clone)]
pub struct CloudTasksQueue {
    client: Client,
    api_base_url: String,
    /// `projects/{project}/locations/{location}/queues/{queue}`
    queue_path: String,
    callback_url: String,
    auth_token: Option<String>,
}

impl CloudTasksQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_base_url: String,
        project_id: &str,
        location: &str,
        queue_id: &str,
        callback_url: String,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            queue_path: format!("projects/{project_id}/locations/{location}/queues/{queue_id}"),
            callback_url,
            auth_token,
        })
    }

    /// Fully-qualified task name for a job key — this is the job handle.
    pub fn task_name(&self, key: &str) -> String {
        format!("{}/tasks/{key}", self.queue_path)
    }

    pub async fn create(
        &self,
        key: &str,
        user_id: &str,
        delay: Duration,
    ) -> Result<String, QueueError> {
        let name = self.task_name(key);
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| QueueError::Request(format!("invalid delay: {e}")))?;
        let schedule_time = (Utc::now() + delay).to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = json!({ "userId": user_id }).to_string();

        let task = CreateTaskRequest {
            task: Task {
                name: name.clone(),
                schedule_time,
                http_request: HttpRequest {
                    http_method: "POST".to_string(),
                    url: self.callback_url.clone(),
                    headers: Headers { content_type: "application/json".to_string() },
                    // Cloud Tasks carries HTTP bodies base64-encoded.
                    body: BASE64.encode(payload),
                },
            },
        };

        let url = format!("{}/{}/tasks", self.api_base_url, self.queue_path);
        let mut req = self.client.post(&url).json(&task);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.map_err(|e| {
            error!(%url, error = %e, "task create failed (transport)");
            QueueError::Request(e.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            // Benign race on the deterministic key: the task is already
            // scheduled, and its name is fully determined by `key`.
            debug!(task = %name, "task already exists");
            return Err(QueueError::AlreadyExists(name));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%status, %body, "task create returned HTTP error");
            return Err(QueueError::Request(format!("HTTP {status}: {body}")));
        }

        // Created tasks come back in BASIC view, which strips the request
        // body and headers — only the name is read, never the full shape.
        let created: CreatedTask = response
            .json()
            .await
            .map_err(|e| QueueError::Request(format!("failed to parse task response: {e}")))?;
        debug!(task = %created.name, "task created");
        Ok(created.name)
    }

    pub async fn delete(&self, handle: &str) -> Result<bool, QueueError> {
        let url = format!("{}/{handle}", self.api_base_url);
        let mut req = self.client.delete(&url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.map_err(|e| {
            error!(%url, error = %e, "task delete failed (transport)");
            QueueError::Request(e.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(task = %handle, "task already gone");
            return Ok(false);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%status, %body, "task delete returned HTTP error");
            return Err(QueueError::Request(format!("HTTP {status}: {body}")));
        }
        Ok(true)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateTaskRequest {
    task: Task,
}

/// Request-only shape — the create response is read as [`CreatedTask`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Task {
    name: String,
    schedule_time: String,
    http_request: HttpRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
    http_method: String,
    url: String,
    headers: Headers,
    body: String,
}

#[derive(Debug, Serialize)]
struct Headers {
    #[serde(rename = "Content-Type")]
    content_type: String,
}

/// The only field the adapter reads back from a create response.
#[derive(Debug, Deserialize)]
struct CreatedTask {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> CloudTasksQueue {
        CloudTasksQueue::new(
            "https://cloudtasks.googleapis.com/v2".into(),
            "proj",
            "us-central1",
            "answer-queue",
            "https://backend.example.com/tasks/answer-job".into(),
            None,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn task_name_is_deterministic() {
        let q = queue();
        assert_eq!(
            q.task_name("answer-abc123"),
            "projects/proj/locations/us-central1/queues/answer-queue/tasks/answer-abc123"
        );
        assert_eq!(q.task_name("answer-abc123"), q.task_name("answer-abc123"));
    }

    #[test]
    fn create_response_without_request_body_parses() {
        // Create responses arrive in BASIC view: the http request's body
        // and headers are stripped. Only the name may be relied on.
        let body = r#"{
            "name": "projects/proj/locations/us-central1/queues/answer-queue/tasks/answer-abc123",
            "scheduleTime": "2026-01-01T00:00:30Z",
            "httpRequest": {
                "httpMethod": "POST",
                "url": "https://backend.example.com/tasks/answer-job"
            },
            "view": "BASIC"
        }"#;
        let created: CreatedTask = serde_json::from_str(body).unwrap();
        assert_eq!(
            created.name,
            "projects/proj/locations/us-central1/queues/answer-queue/tasks/answer-abc123"
        );
    }
}

//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `REPLYQ_BIND` and `REPLYQ_LOG_LEVEL` env overrides.
//! Secrets (`MODEL_API_KEY`, `QUEUE_AUTH_TOKEN`, `MODEL_ASSISTANT_ID`) are
//! only ever sourced from the environment, never from TOML.

use std::{env, fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger;
use crate::pipeline::OnModelFailure;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the API listener to.
    pub bind: String,
}

/// Document store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the RTDB-style REST store (no trailing slash).
    pub base_url: String,
}

/// Delayed-callback queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue API base URL (no trailing slash). Overridable so tests can
    /// point the adapter at a local mock.
    pub api_base_url: String,
    pub project_id: String,
    pub location: String,
    pub queue_id: String,
    /// URL the queue posts `{"userId": ...}` to when a job fires.
    pub callback_url: String,
}

/// Conversational model configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// API base URL (e.g. `https://api.openai.com/v1`), no trailing slash.
    pub api_base_url: String,
    /// Assistant to run against each conversation. Overridden by
    /// `MODEL_ASSISTANT_ID`.
    pub assistant_id: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Interval between run-status polls.
    pub poll_interval: Duration,
    /// Ceiling on the whole run wait; expiry is a `Timeout` error.
    pub run_timeout: Duration,
    /// What the pipeline does when the run itself reports failure.
    pub on_failure: OnModelFailure,
}

/// Outbound notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// Fixed address `{userId, message}` is posted to.
    pub url: String,
    /// User-id namespace prefix that routes to the notifier (e.g. `"tg:"`).
    pub user_prefix: String,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub model: ModelConfig,
    pub notifier: NotifierConfig,
    /// From `MODEL_API_KEY` — `None` for keyless local endpoints.
    pub model_api_key: Option<String>,
    /// From `QUEUE_AUTH_TOKEN` — bearer token for the queue API, if any.
    pub queue_auth_token: Option<String>,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    server: RawServer,
    store: RawStore,
    queue: RawQueue,
    #[serde(default)]
    model: RawModel,
    #[serde(default)]
    notifier: RawNotifier,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Deserialize)]
struct RawStore {
    base_url: String,
}

#[derive(Deserialize)]
struct RawQueue {
    #[serde(default = "default_queue_api_base_url")]
    api_base_url: String,
    project_id: String,
    location: String,
    queue_id: String,
    callback_url: String,
}

#[derive(Deserialize)]
struct RawModel {
    #[serde(default = "default_model_api_base_url")]
    api_base_url: String,
    #[serde(default)]
    assistant_id: String,
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_run_timeout_seconds")]
    run_timeout_seconds: u64,
    #[serde(default = "default_on_failure")]
    on_failure: String,
}

impl Default for RawModel {
    fn default() -> Self {
        Self {
            api_base_url: default_model_api_base_url(),
            assistant_id: String::new(),
            request_timeout_seconds: default_request_timeout_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            run_timeout_seconds: default_run_timeout_seconds(),
            on_failure: default_on_failure(),
        }
    }
}

#[derive(Deserialize)]
struct RawNotifier {
    #[serde(default = "default_false")]
    enabled: bool,
    #[serde(default)]
    url: String,
    #[serde(default)]
    user_prefix: String,
}

impl Default for RawNotifier {
    fn default() -> Self {
        Self { enabled: false, url: String::new(), user_prefix: String::new() }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_bind() -> String { "127.0.0.1:8000".to_string() }
fn default_model_api_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_queue_api_base_url() -> String { "https://cloudtasks.googleapis.com/v2".to_string() }
fn default_request_timeout_seconds() -> u64 { 30 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_run_timeout_seconds() -> u64 { 120 }
fn default_on_failure() -> String { "placeholder".to_string() }
fn default_false() -> bool { false }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let bind_override = env::var("REPLYQ_BIND").ok();
    let log_level_override = env::var("REPLYQ_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        bind_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    bind_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let on_failure = parse_on_failure(&parsed.model.on_failure)?;

    if parsed.model.poll_interval_ms == 0 {
        return Err(AppError::Config("model.poll_interval_ms must be > 0".into()));
    }

    let assistant_id = env::var("MODEL_ASSISTANT_ID")
        .ok()
        .unwrap_or(parsed.model.assistant_id);

    // Reject a bad level here rather than at logger init, so a typo in
    // the TOML or in REPLYQ_LOG_LEVEL fails with a config error.
    let log_level = log_level_override.unwrap_or(&parsed.log_level).to_string();
    logger::parse_level(&log_level)?;

    Ok(Config {
        log_level,
        server: ServerConfig {
            bind: bind_override.unwrap_or(&parsed.server.bind).to_string(),
        },
        store: StoreConfig {
            base_url: parsed.store.base_url.trim_end_matches('/').to_string(),
        },
        queue: QueueConfig {
            api_base_url: parsed.queue.api_base_url.trim_end_matches('/').to_string(),
            project_id: parsed.queue.project_id,
            location: parsed.queue.location,
            queue_id: parsed.queue.queue_id,
            callback_url: parsed.queue.callback_url,
        },
        model: ModelConfig {
            api_base_url: parsed.model.api_base_url.trim_end_matches('/').to_string(),
            assistant_id,
            request_timeout: Duration::from_secs(parsed.model.request_timeout_seconds),
            poll_interval: Duration::from_millis(parsed.model.poll_interval_ms),
            run_timeout: Duration::from_secs(parsed.model.run_timeout_seconds),
            on_failure,
        },
        notifier: NotifierConfig {
            enabled: parsed.notifier.enabled,
            url: parsed.notifier.url,
            user_prefix: parsed.notifier.user_prefix,
        },
        model_api_key: env::var("MODEL_API_KEY").ok(),
        queue_auth_token: env::var("QUEUE_AUTH_TOKEN").ok(),
    })
}

fn parse_on_failure(s: &str) -> Result<OnModelFailure, AppError> {
    match s {
        "placeholder" => Ok(OnModelFailure::Placeholder),
        "abort" => Ok(OnModelFailure::Abort),
        other => Err(AppError::Config(format!(
            "model.on_failure must be 'placeholder' or 'abort', got '{other}'"
        ))),
    }
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — localhost endpoints, no secrets.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            log_level: "info".into(),
            server: ServerConfig { bind: default_bind() },
            store: StoreConfig { base_url: "http://localhost:0".into() },
            queue: QueueConfig {
                api_base_url: "http://localhost:0/v2".into(),
                project_id: "test-project".into(),
                location: "us-central1".into(),
                queue_id: "answer-queue".into(),
                callback_url: "http://localhost:0/tasks/answer-job".into(),
            },
            model: ModelConfig {
                api_base_url: "http://localhost:0/v1".into(),
                assistant_id: "asst_test".into(),
                request_timeout: Duration::from_secs(1),
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_secs(1),
                on_failure: OnModelFailure::Placeholder,
            },
            notifier: NotifierConfig {
                enabled: false,
                url: String::new(),
                user_prefix: String::new(),
            },
            model_api_key: None,
            queue_auth_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[store]
base_url = "https://example-db.firebaseio.com/"

[queue]
project_id = "proj"
location = "us-central1"
queue_id = "answer-queue"
callback_url = "https://backend.example.com/tasks/answer-job"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_fills_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert_eq!(cfg.model.poll_interval, Duration::from_millis(1000));
        assert_eq!(cfg.model.run_timeout, Duration::from_secs(120));
        assert!(matches!(cfg.model.on_failure, OnModelFailure::Placeholder));
        assert!(!cfg.notifier.enabled);
    }

    #[test]
    fn store_base_url_trailing_slash_trimmed() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.store.base_url, "https://example-db.firebaseio.com");
    }

    #[test]
    fn bind_and_log_level_overrides() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("0.0.0.0:9000"), Some("debug")).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn on_failure_abort_parses() {
        let toml = format!("{MINIMAL_TOML}\n[model]\non_failure = \"abort\"\n");
        let f = write_toml(&toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert!(matches!(cfg.model.on_failure, OnModelFailure::Abort));
    }

    #[test]
    fn on_failure_unknown_value_errors() {
        let toml = format!("{MINIMAL_TOML}\n[model]\non_failure = \"retry\"\n");
        let f = write_toml(&toml);
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("on_failure"));
    }

    #[test]
    fn zero_poll_interval_errors() {
        let toml = format!("{MINIMAL_TOML}\n[model]\npoll_interval_ms = 0\n");
        let f = write_toml(&toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config error"));
    }

    #[test]
    fn queue_api_base_url_defaults_and_overrides() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.queue.api_base_url, "https://cloudtasks.googleapis.com/v2");

        let toml = MINIMAL_TOML.replace(
            "[queue]",
            "[queue]\napi_base_url = \"http://localhost:9090/v2/\"",
        );
        let f = write_toml(&toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.queue.api_base_url, "http://localhost:9090/v2");
    }

    #[test]
    fn invalid_log_level_errors() {
        let toml = format!("log_level = \"verbose\"\n{MINIMAL_TOML}");
        let f = write_toml(&toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn invalid_log_level_override_errors() {
        let f = write_toml(MINIMAL_TOML);
        assert!(load_from(f.path(), None, Some("loud")).is_err());
    }

    #[test]
    fn test_default_is_local_only() {
        let cfg = Config::test_default();
        assert!(cfg.store.base_url.starts_with("http://localhost"));
        assert!(cfg.model_api_key.is_none());
        assert!(cfg.queue_auth_token.is_none());
    }

    #[test]
    fn missing_queue_section_errors() {
        let f = write_toml("[store]\nbase_url = \"http://x\"\n");
        assert!(load_from(f.path(), None, None).is_err());
    }
}

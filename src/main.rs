//! replyq — service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at configured level
//!   4. Build adapters (store, queue, model, notifier)
//!   5. Serve the API until Ctrl-C

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use replyq::api::{self, AppState};
use replyq::config;
use replyq::error::AppError;
use replyq::model::{AssistantsClient, ModelClient};
use replyq::notify::Notifier;
use replyq::pipeline::AnswerPipeline;
use replyq::queue::{CloudTasksQueue, DelayedQueue};
use replyq::scheduler::TaskScheduler;
use replyq::store::{FirebaseStore, Store};
use replyq::logger;

/// HTTP timeout for the store, queue and notifier clients.
const ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level)?;

    info!(
        bind = %config.server.bind,
        store = %config.store.base_url,
        callback = %config.queue.callback_url,
        "config loaded"
    );

    let shutdown = CancellationToken::new();

    let store = Store::Firebase(FirebaseStore::new(
        config.store.base_url.clone(),
        ADAPTER_TIMEOUT,
    )?);
    let queue = DelayedQueue::CloudTasks(CloudTasksQueue::new(
        config.queue.api_base_url.clone(),
        &config.queue.project_id,
        &config.queue.location,
        &config.queue.queue_id,
        config.queue.callback_url.clone(),
        config.queue_auth_token.clone(),
        ADAPTER_TIMEOUT,
    )?);
    let model = ModelClient::Assistants(AssistantsClient::new(
        config.model.api_base_url.clone(),
        config.model.assistant_id.clone(),
        config.model_api_key.clone(),
        config.model.request_timeout,
        config.model.poll_interval,
        config.model.run_timeout,
        shutdown.clone(),
    )?);

    let notifier = if config.notifier.enabled {
        let n = Notifier::new(
            config.notifier.url.clone(),
            config.notifier.user_prefix.clone(),
            ADAPTER_TIMEOUT,
        )
        .map_err(|e| AppError::Config(format!("notifier: {e}")))?;
        Some(n)
    } else {
        None
    };

    let scheduler = TaskScheduler::new(store.clone(), queue);
    let pipeline = AnswerPipeline::new(
        store,
        model.clone(),
        scheduler.clone(),
        notifier,
        config.model.on_failure,
    );

    let app = api::router(AppState { scheduler, pipeline, model });
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C and cancel in-flight model waits.
async fn shutdown_signal(token: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    token.cancel();
}

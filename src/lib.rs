pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use tokio::sync::watch;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::services::proctoring::{self, ProctoringTracker};

async fn build_state(settings: Settings) -> anyhow::Result<AppState> {
    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without rate limits");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let tracker = ProctoringTracker::from_settings(settings.proctoring());
    Ok(AppState::new(settings, db_pool, redis, tracker))
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let state = build_state(settings).await?;
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    let (cleanup_tx, cleanup_rx) = watch::channel(false);
    let cleanup =
        tokio::spawn(tasks::scheduler::proctoring_cleanup_loop(state.clone(), cleanup_rx));

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Examcore API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if cleanup_tx.send(true).is_err() {
        tracing::warn!("Proctoring cleanup task already stopped");
    }
    if let Err(err) = cleanup.await {
        tracing::error!(error = %err, "Proctoring cleanup task join failed");
    }

    let drained = state.proctoring().drain();
    if !drained.is_empty() {
        tracing::info!(sessions = drained.len(), "Flushing live proctoring sessions");
        proctoring::persist_summaries(state.db(), &drained).await;
    }

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let state = build_state(settings).await?;
    let result = tasks::scheduler::run(state.clone()).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

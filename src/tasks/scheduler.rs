use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::services::{attempts, proctoring};

/// Worker entry point: runs the attempt sweeps until a shutdown signal.
pub(crate) async fn run(state: AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = vec![
        tokio::spawn(deadline_sweep_loop(state.clone(), shutdown_rx.clone())),
        tokio::spawn(ranking_retry_loop(state.clone(), shutdown_rx.clone())),
    ];

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn deadline_sweep_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = ticker(state.settings().exam().deadline_sweep_seconds);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = attempts::expire_overdue_attempts(state.db()).await {
                    tracing::error!(error = %err, "expire_overdue_attempts failed");
                }
            }
        }
    }
}

async fn ranking_retry_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = ticker(state.settings().exam().ranking_retry_sweep_seconds);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = attempts::retry_missing_rankings(state.db()).await {
                    tracing::error!(error = %err, "retry_missing_rankings failed");
                }
            }
        }
    }
}

/// Runs inside the API process, since the session registry lives there.
/// Swept sessions are written to the audit log.
pub(crate) async fn proctoring_cleanup_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let settings = state.settings().proctoring();
    let max_age =
        time::Duration::seconds(i64::try_from(settings.session_max_age_seconds).unwrap_or(i64::MAX));
    let mut tick = ticker(settings.cleanup_interval_seconds);
    // The first tick fires immediately and would find nothing to sweep.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let swept = state.proctoring().cleanup_old_sessions(max_age);
                proctoring::persist_summaries(state.db(), &swept).await;
            }
        }
    }
}

fn ticker(seconds: u64) -> tokio::time::Interval {
    let mut tick = interval(Duration::from_secs(seconds.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

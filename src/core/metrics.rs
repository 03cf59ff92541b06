use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("attempts_started_total", "Exam attempts created");
    metrics::describe_counter!(
        "attempts_submitted_total",
        "Exam attempts that reached the submitted state, labelled by trigger"
    );
    metrics::describe_counter!("answers_graded_total", "Answers graded on submission");
    metrics::describe_counter!("ranking_failures_total", "Rank/percentile computations that failed");
    metrics::describe_counter!("proctoring_violations_total", "Violations recorded, by kind");
    metrics::describe_counter!("proctoring_sessions_flagged_total", "Sessions promoted to flagged");
    metrics::describe_counter!(
        "proctoring_sessions_swept_total",
        "Idle sessions removed by the cleanup sweep"
    );
    metrics::describe_gauge!("proctoring_sessions_live", "Sessions held in the live registry");
}

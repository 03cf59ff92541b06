pub(crate) mod classifier;
pub(crate) mod tracker;

use sqlx::PgPool;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::repositories;

pub(crate) use classifier::{ProctoringStatus, ViolationKind, ViolationRecord};
pub(crate) use tracker::{
    DevicePresence, ProctoringTracker, SessionKey, SessionSnapshot, SessionSummary,
    ViolationOutcome,
};

/// Writes session summaries to the audit log. Failures are logged and
/// swallowed; proctoring never fails the caller.
pub(crate) async fn persist_summaries(pool: &PgPool, summaries: &[SessionSummary]) {
    for summary in summaries {
        if let Err(err) = persist_summary(pool, summary).await {
            tracing::warn!(
                exam_id = %summary.key.exam_id,
                user_id = %summary.key.user_id,
                error = %err,
                "Failed to persist proctoring session summary"
            );
        }
    }
}

async fn persist_summary(pool: &PgPool, summary: &SessionSummary) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    repositories::proctoring_logs::create(
        pool,
        repositories::proctoring_logs::CreateSessionLog {
            id: &id,
            exam_id: &summary.key.exam_id,
            user_id: &summary.key.user_id,
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            duration_seconds: summary.duration_seconds,
            final_score: i32::try_from(summary.final_score).unwrap_or(i32::MAX),
            final_status: summary.final_status.as_str(),
            end_reason: summary.end_reason.as_str(),
            violations: &summary.violations,
            created_at: primitive_now_utc(),
        },
    )
    .await
}

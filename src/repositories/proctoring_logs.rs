use sqlx::types::Json;
use sqlx::PgPool;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::services::proctoring::ViolationRecord;

pub(crate) struct CreateSessionLog<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) user_id: &'a str,
    pub(crate) started_at: OffsetDateTime,
    pub(crate) ended_at: OffsetDateTime,
    pub(crate) duration_seconds: i64,
    pub(crate) final_score: i32,
    pub(crate) final_status: &'a str,
    pub(crate) end_reason: &'a str,
    pub(crate) violations: &'a [ViolationRecord],
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, log: CreateSessionLog<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO proctoring_session_logs (
            id, exam_id, user_id, started_at, ended_at, duration_seconds,
            final_score, final_status, end_reason, violations, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
    )
    .bind(log.id)
    .bind(log.exam_id)
    .bind(log.user_id)
    .bind(log.started_at)
    .bind(log.ended_at)
    .bind(log.duration_seconds)
    .bind(log.final_score)
    .bind(log.final_status)
    .bind(log.end_reason)
    .bind(Json(log.violations))
    .bind(log.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

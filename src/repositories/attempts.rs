use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::{ExamAttempt, RankingRow};
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, user_id, status, attempt_number, started_at, submitted_at, expires_at, \
    answers, section_stats, total_score, max_score, percentage, time_remaining_seconds, \
    rank, percentile, submission_trigger, version, created_at, updated_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!("SELECT {COLUMNS} FROM exam_attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Loads the attempt and holds its row lock until the surrounding transaction ends.
pub(crate) async fn lock_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Serializes attempt creation for one (exam, user) pair within a transaction.
pub(crate) async fn lock_exam_user(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
        .bind(exam_id)
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn find_active(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts \
         WHERE exam_id = $1 AND user_id = $2 AND status IN ($3, $4)"
    ))
    .bind(exam_id)
    .bind(user_id)
    .bind(AttemptStatus::Started)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_by_exam_and_user(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM exam_attempts WHERE exam_id = $1 AND user_id = $2")
        .bind(exam_id)
        .bind(user_id)
        .fetch_one(executor)
        .await
}

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: &ExamAttempt,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exam_attempts (
            id, exam_id, user_id, status, attempt_number, started_at, expires_at,
            answers, section_stats, total_score, max_score, time_remaining_seconds,
            version, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
    )
    .bind(&attempt.id)
    .bind(&attempt.exam_id)
    .bind(&attempt.user_id)
    .bind(attempt.status)
    .bind(attempt.attempt_number)
    .bind(attempt.started_at)
    .bind(attempt.expires_at)
    .bind(&attempt.answers)
    .bind(&attempt.section_stats)
    .bind(attempt.total_score)
    .bind(attempt.max_score)
    .bind(attempt.time_remaining_seconds)
    .bind(attempt.version)
    .bind(attempt.created_at)
    .bind(attempt.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Writes the mutable state of `attempt` if its stored version still equals
/// `attempt.version`, bumping the version. Returns `false` on a version miss.
pub(crate) async fn save(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: &ExamAttempt,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_attempts
         SET status = $1,
             submitted_at = $2,
             answers = $3,
             section_stats = $4,
             total_score = $5,
             percentage = $6,
             time_remaining_seconds = $7,
             rank = $8,
             percentile = $9,
             submission_trigger = $10,
             updated_at = $11,
             version = version + 1
         WHERE id = $12 AND version = $13",
    )
    .bind(attempt.status)
    .bind(attempt.submitted_at)
    .bind(&attempt.answers)
    .bind(&attempt.section_stats)
    .bind(attempt.total_score)
    .bind(attempt.percentage)
    .bind(attempt.time_remaining_seconds)
    .bind(attempt.rank)
    .bind(attempt.percentile)
    .bind(attempt.submission_trigger)
    .bind(attempt.updated_at)
    .bind(&attempt.id)
    .bind(attempt.version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn set_ranking(
    pool: &PgPool,
    id: &str,
    rank: i32,
    percentile: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE exam_attempts SET rank = $1, percentile = $2 WHERE id = $3 AND status = $4",
    )
    .bind(rank)
    .bind(percentile)
    .bind(id)
    .bind(AttemptStatus::Submitted)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn list_submitted_for_ranking(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<RankingRow>, sqlx::Error> {
    sqlx::query_as::<_, RankingRow>(
        "SELECT id, user_id, total_score, percentage, submitted_at
         FROM exam_attempts
         WHERE exam_id = $1 AND status = $2 AND submitted_at IS NOT NULL
         ORDER BY total_score DESC, submitted_at ASC, id ASC",
    )
    .bind(exam_id)
    .bind(AttemptStatus::Submitted)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_user(
    pool: &PgPool,
    user_id: &str,
    exam_id: Option<&str>,
    skip: i64,
    limit: i64,
) -> Result<Vec<ExamAttempt>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE user_id = "
    ));
    builder.push_bind(user_id);

    if let Some(exam_id) = exam_id {
        builder.push(" AND exam_id = ");
        builder.push_bind(exam_id);
    }

    builder.push(" ORDER BY started_at DESC OFFSET ");
    builder.push_bind(skip.max(0));
    builder.push(" LIMIT ");
    builder.push_bind(limit.clamp(1, 1000));

    builder.build_query_as::<ExamAttempt>().fetch_all(pool).await
}

pub(crate) async fn list_overdue_ids(
    pool: &PgPool,
    now: PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT id FROM exam_attempts
         WHERE status IN ($1, $2) AND expires_at <= $3
         ORDER BY expires_at ASC
         LIMIT $4",
    )
    .bind(AttemptStatus::Started)
    .bind(AttemptStatus::InProgress)
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Submitted attempts still waiting for a rank, as `(attempt_id, exam_id)`.
pub(crate) async fn list_unranked(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as::<_, (String, String)>(
        "SELECT id, exam_id FROM exam_attempts
         WHERE status = $1 AND rank IS NULL
         ORDER BY submitted_at ASC
         LIMIT $2",
    )
    .bind(AttemptStatus::Submitted)
    .bind(limit)
    .fetch_all(pool)
    .await
}

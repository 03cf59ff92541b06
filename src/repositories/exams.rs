use crate::db::models::Exam;

pub(crate) const COLUMNS: &str = "\
    id, title, start_time, end_time, duration_minutes, max_attempts, \
    access_mode, status, created_by, created_at, updated_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

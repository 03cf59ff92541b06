pub(crate) async fn is_enrolled(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM exam_enrollments WHERE exam_id = $1 AND user_id = $2)",
    )
    .bind(exam_id)
    .bind(user_id)
    .fetch_one(executor)
    .await
}

use crate::db::models::QuestionRow;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, section_id, ordinal, question_type, options, correct_answer, \
    marks, negative_marks, tolerance";

pub(crate) async fn list_by_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<QuestionRow>, sqlx::Error> {
    sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 ORDER BY ordinal ASC, id ASC"
    ))
    .bind(exam_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn find_in_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    question_id: &str,
) -> Result<Option<QuestionRow>, sqlx::Error> {
    sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 AND id = $2"
    ))
    .bind(exam_id)
    .bind(question_id)
    .fetch_optional(executor)
    .await
}

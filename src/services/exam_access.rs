use sqlx::PgExecutor;

use crate::db::models::Exam;
use crate::db::types::AccessMode;
use crate::repositories;

/// Whether `user_id` may sit `exam`. Open exams admit anyone authenticated;
/// enrolled exams require a row in `exam_enrollments`.
pub(crate) async fn may_attempt(
    executor: impl PgExecutor<'_>,
    exam: &Exam,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    match exam.access_mode {
        AccessMode::Open => Ok(true),
        AccessMode::Enrolled => {
            repositories::enrollments::is_enrolled(executor, &exam.id, user_id).await
        }
    }
}

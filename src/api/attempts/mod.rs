mod handlers;

use axum::{routing::get, routing::post, routing::put, Router};

use crate::core::state::AppState;

/// Routes nested under `/attempts`.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_my_attempts))
        .route("/:attempt_id", get(handlers::get_attempt))
        .route("/:attempt_id/answers/:question_id", put(handlers::submit_answer))
        .route("/:attempt_id/answers/:question_id/review", put(handlers::mark_for_review))
        .route("/:attempt_id/time", post(handlers::sync_time))
        .route("/:attempt_id/complete", post(handlers::complete_attempt))
}

/// Exam-scoped routes nested under `/exams`.
pub(crate) fn exam_router() -> Router<AppState> {
    Router::new()
        .route("/:exam_id/attempts", post(handlers::start_attempt))
        .route("/:exam_id/standings", get(handlers::standings))
}

#[cfg(test)]
mod tests;

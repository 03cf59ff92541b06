mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/exams/:exam_id/session",
            post(handlers::start_session)
                .get(handlers::session_status)
                .delete(handlers::end_session),
        )
        .route("/exams/:exam_id/activity", post(handlers::heartbeat))
        .route("/exams/:exam_id/violations", post(handlers::record_violation))
        .route("/exams/:exam_id/inactivity-check", post(handlers::check_inactivity))
        .route("/sessions", get(handlers::list_sessions))
}

#[cfg(test)]
mod tests;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentReviewer, CurrentUser};
use crate::core::state::AppState;
use crate::schemas::attempt::{
    AnswerGradedResponse, AnswerSubmit, AttemptListQuery, AttemptResponse, ReviewMark,
    ReviewResponse, StandingResponse, StandingsResponse, SubmissionResponse, TimeSync,
    TimeSyncResponse,
};
use crate::services::attempts::{self, Transition};

const RATE_WINDOW_SECONDS: u64 = 1;

pub(super) async fn start_attempt(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    let attempt = attempts::start_attempt(state.db(), &exam_id, &user.id).await?;

    tracing::info!(
        attempt_id = %attempt.id,
        exam_id = %exam_id,
        user_id = %user.id,
        attempt_number = attempt.attempt_number,
        "Attempt started"
    );

    Ok((StatusCode::CREATED, Json(AttemptResponse::from(&attempt))))
}

pub(super) async fn list_my_attempts(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<AttemptListQuery>,
) -> Result<Json<Vec<AttemptResponse>>, ApiError> {
    query.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let items = attempts::list_my_attempts(
        state.db(),
        &user.id,
        query.exam_id.as_deref(),
        query.skip(),
        query.limit(),
    )
    .await?;

    Ok(Json(items.iter().map(AttemptResponse::from).collect()))
}

pub(super) async fn get_attempt(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = attempts::get_attempt(state.db(), &user.id, &attempt_id).await?;
    Ok(Json(AttemptResponse::from(&attempt)))
}

pub(super) async fn submit_answer(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((attempt_id, question_id)): Path<(String, String)>,
    Json(payload): Json<AnswerSubmit>,
) -> Result<Json<AnswerGradedResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let limit = state.settings().exam().answer_rate_limit_per_second;
    let key = format!("rate:answers:{attempt_id}");
    if !state.redis().allow(&key, limit, RATE_WINDOW_SECONDS).await {
        return Err(ApiError::TooManyRequests("Too many answer submissions"));
    }

    let update = attempts::submit_answer(
        state.db(),
        &user.id,
        &attempt_id,
        &question_id,
        &payload.answer,
        payload.time_spent_seconds,
    )
    .await?;

    Ok(Json(AnswerGradedResponse::new(&update.attempt, update.outcome)))
}

pub(super) async fn mark_for_review(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((attempt_id, question_id)): Path<(String, String)>,
    Json(payload): Json<ReviewMark>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let attempt =
        attempts::mark_for_review(state.db(), &user.id, &attempt_id, &question_id, payload.marked)
            .await?;

    Ok(Json(ReviewResponse {
        attempt_id: attempt.id,
        question_id,
        marked_for_review: payload.marked,
    }))
}

pub(super) async fn sync_time(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<TimeSync>,
) -> Result<Json<TimeSyncResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let update =
        attempts::sync_time(state.db(), &user.id, &attempt_id, payload.time_remaining_seconds)
            .await?;

    let submission = match &update.outcome {
        Transition::Submitted(outcome) => Some(SubmissionResponse::new(&update.attempt, outcome)),
        _ => None,
    };

    Ok(Json(TimeSyncResponse {
        attempt_id: update.attempt.id.clone(),
        status: update.attempt.status,
        time_remaining_seconds: update.attempt.time_remaining_seconds,
        submission,
    }))
}

pub(super) async fn complete_attempt(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let update = attempts::complete_attempt(state.db(), &user.id, &attempt_id).await?;

    tracing::info!(
        attempt_id = %attempt_id,
        user_id = %user.id,
        total_score = update.outcome.total_score,
        percentage = update.outcome.percentage,
        "Attempt submitted"
    );

    Ok(Json(SubmissionResponse::new(&update.attempt, &update.outcome)))
}

pub(super) async fn standings(
    CurrentReviewer(_reviewer): CurrentReviewer,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<Json<StandingsResponse>, ApiError> {
    let rows = attempts::standings(state.db(), &exam_id).await?;

    Ok(Json(StandingsResponse {
        exam_id,
        population: rows.len(),
        standings: rows.into_iter().map(StandingResponse::from).collect(),
    }))
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentReviewer, CurrentUser};
use crate::core::state::AppState;
use crate::schemas::proctoring::{
    InactivityCheck, SessionEndResponse, SessionListQuery, SessionResponse, SessionStart,
    SessionStartResponse, SessionStatusResponse, SessionSummaryResponse, ViolationRecordedResponse,
    ViolationReport,
};
use crate::services::proctoring::{self, ProctoringStatus, SessionKey, ViolationKind};

const RATE_WINDOW_SECONDS: u64 = 1;

pub(super) async fn start_session(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    payload: Option<Json<SessionStart>>,
) -> (StatusCode, Json<SessionStartResponse>) {
    let devices = payload.map(|Json(payload)| payload).unwrap_or_default().into();
    let (snapshot, created) =
        state.proctoring().start_session(SessionKey::new(exam_id, user.id), devices);

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    (status, Json(SessionStartResponse { created, session: SessionResponse::from(snapshot) }))
}

pub(super) async fn session_status(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Json<SessionStatusResponse> {
    let session = state
        .proctoring()
        .session_status(&SessionKey::new(exam_id, user.id))
        .map(SessionResponse::from);
    Json(SessionStatusResponse { session })
}

pub(super) async fn heartbeat(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Json<SessionStatusResponse> {
    let session = state
        .proctoring()
        .update_activity(&SessionKey::new(exam_id, user.id))
        .map(SessionResponse::from);
    Json(SessionStatusResponse { session })
}

pub(super) async fn record_violation(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    Json(payload): Json<ViolationReport>,
) -> Result<Json<ViolationRecordedResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if payload.kind == ViolationKind::Inactivity {
        return Err(ApiError::BadRequest(
            "Inactivity is detected by the server through inactivity-check".to_string(),
        ));
    }

    let key = SessionKey::new(exam_id, user.id);
    if !allow_event(&state, &key).await {
        return Ok(Json(ViolationRecordedResponse::skipped()));
    }

    let tracker = state.proctoring();
    let outcome = match (payload.kind, payload.details) {
        (ViolationKind::TabSwitch, None) => tracker.record_tab_switch(&key),
        (ViolationKind::FullscreenExit, None) => tracker.record_fullscreen_exit(&key),
        (kind, details) => tracker.record_violation(&key, kind, details),
    };

    Ok(Json(outcome.map_or_else(ViolationRecordedResponse::skipped, Into::into)))
}

pub(super) async fn check_inactivity(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    payload: Option<Json<InactivityCheck>>,
) -> Result<Json<ViolationRecordedResponse>, ApiError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let max_idle_seconds =
        payload.max_idle_seconds.unwrap_or(state.settings().proctoring().max_idle_seconds);
    let max_idle = time::Duration::seconds(i64::try_from(max_idle_seconds).unwrap_or(i64::MAX));

    let outcome =
        state.proctoring().check_inactivity(&SessionKey::new(exam_id, user.id), max_idle);

    Ok(Json(outcome.map_or_else(ViolationRecordedResponse::skipped, Into::into)))
}

pub(super) async fn end_session(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Json<SessionEndResponse> {
    let Some(summary) = state.proctoring().end_session(&SessionKey::new(exam_id, user.id)) else {
        return Json(SessionEndResponse { ended: false, summary: None });
    };

    proctoring::persist_summaries(state.db(), std::slice::from_ref(&summary)).await;

    Json(SessionEndResponse {
        ended: true,
        summary: Some(SessionSummaryResponse::from(&summary)),
    })
}

pub(super) async fn list_sessions(
    CurrentReviewer(_reviewer): CurrentReviewer,
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ProctoringStatus>)
        .transpose()
        .map_err(|value| ApiError::BadRequest(format!("Unknown session status '{value}'")))?;

    let sessions = state.proctoring().list_sessions(status);
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// Per-session event budget. Redis being unavailable allows the event.
async fn allow_event(state: &AppState, key: &SessionKey) -> bool {
    let limit = state.settings().proctoring().event_rate_limit_per_second;
    let redis_key = format!("rate:proctoring:{}:{}", key.exam_id, key.user_id);
    let allowed = state.redis().allow(&redis_key, limit, RATE_WINDOW_SECONDS).await;
    if !allowed {
        tracing::warn!(
            exam_id = %key.exam_id,
            user_id = %key.user_id,
            "Proctoring event rate limited"
        );
    }
    allowed
}

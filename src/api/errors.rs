use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::attempts::AttemptError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    code: &'static str,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    TooManyRequests(&'static str),
    /// A domain rejection with its own status and machine-readable code.
    Domain { status: StatusCode, detail: String, code: &'static str },
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    fn parts(self) -> (StatusCode, String, &'static str) {
        match self {
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, message.to_string(), "unauthorized")
            }
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message.to_string(), "forbidden"),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, "bad_request"),
            ApiError::TooManyRequests(message) => {
                (StatusCode::TOO_MANY_REQUESTS, message.to_string(), "rate_limited")
            }
            ApiError::Domain { status, detail, code } => (status, detail, code),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message, "internal_error")
            }
        }
    }
}

impl From<AttemptError> for ApiError {
    fn from(err: AttemptError) -> Self {
        let status = match &err {
            AttemptError::ExamNotOpen | AttemptError::QuestionNotInAttempt(_) => {
                StatusCode::BAD_REQUEST
            }
            AttemptError::AccessDenied => StatusCode::FORBIDDEN,
            AttemptError::AttemptLimitReached { .. }
            | AttemptError::AttemptAlreadyActive { .. }
            | AttemptError::AttemptNotActive
            | AttemptError::AlreadySubmitted
            | AttemptError::StaleAttempt => StatusCode::CONFLICT,
            AttemptError::ExamNotFound | AttemptError::AttemptNotFound => StatusCode::NOT_FOUND,
            AttemptError::InvalidAnswer(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AttemptError::Evaluation(_) => {
                tracing::error!(error = %err, "Failed to evaluate stored question");
                return ApiError::Domain {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    detail: "Failed to evaluate stored question".to_string(),
                    code: err.code(),
                };
            }
            AttemptError::Database(_) => {
                return ApiError::internal(&err, "Database operation failed");
            }
        };

        ApiError::Domain { status, detail: err.to_string(), code: err.code() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let unauthorized = matches!(self, ApiError::Unauthorized(_));
        let (status, detail, code) = self.parts();
        let mut response =
            (status, Json(ErrorResponse { status: status.as_u16(), detail, code })).into_response();

        if unauthorized {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

use thiserror::Error;

use crate::services::evaluator::EvaluationError;

#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("Exam is not open for attempts")]
    ExamNotOpen,
    #[error("You are not allowed to attempt this exam")]
    AccessDenied,
    #[error("Maximum number of attempts ({max_attempts}) reached for this exam")]
    AttemptLimitReached { max_attempts: i32 },
    #[error("An attempt is already in progress for this exam")]
    AttemptAlreadyActive { attempt_id: String },
    #[error("Attempt is no longer active")]
    AttemptNotActive,
    #[error("Attempt has already been submitted")]
    AlreadySubmitted,
    #[error("Question {0} is not part of this attempt")]
    QuestionNotInAttempt(String),
    #[error("Exam not found")]
    ExamNotFound,
    #[error("Attempt not found")]
    AttemptNotFound,
    #[error("Attempt was modified concurrently")]
    StaleAttempt,
    /// The client sent an answer whose shape does not fit the question type.
    #[error("Invalid answer: {0}")]
    InvalidAnswer(EvaluationError),
    /// Stored question data failed evaluation.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl AttemptError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            AttemptError::ExamNotOpen => "exam_not_open",
            AttemptError::AccessDenied => "access_denied",
            AttemptError::AttemptLimitReached { .. } => "attempt_limit_reached",
            AttemptError::AttemptAlreadyActive { .. } => "attempt_already_active",
            AttemptError::AttemptNotActive => "attempt_not_active",
            AttemptError::AlreadySubmitted => "already_submitted",
            AttemptError::QuestionNotInAttempt(_) => "question_not_in_attempt",
            AttemptError::ExamNotFound => "exam_not_found",
            AttemptError::AttemptNotFound => "attempt_not_found",
            AttemptError::StaleAttempt => "stale_attempt",
            AttemptError::InvalidAnswer(_) => "malformed_answer",
            AttemptError::Evaluation(EvaluationError::InvalidQuestionType(_)) => {
                "invalid_question_type"
            }
            AttemptError::Evaluation(EvaluationError::MalformedAnswer { .. }) => "malformed_answer",
            AttemptError::Evaluation(EvaluationError::InvalidQuestion { .. }) => "invalid_question",
            AttemptError::Database(_) => "internal_error",
        }
    }
}

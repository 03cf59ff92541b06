use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{AnswerRecord, ExamAttempt, SectionStats};
use crate::db::types::{AttemptStatus, SubmissionTrigger};
use crate::services::attempts::{AnswerOutcome, StandingRow, SubmissionOutcome};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerSubmit {
    /// Raw answer. Its shape is checked against the question type; `null`
    /// clears the answer.
    #[serde(default)]
    pub(crate) answer: serde_json::Value,
    #[serde(default)]
    #[serde(alias = "timeSpent", alias = "timeSpentSeconds")]
    #[validate(range(max = 86400, message = "time_spent_seconds must not exceed one day"))]
    pub(crate) time_spent_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewMark {
    pub(crate) marked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct TimeSync {
    #[serde(alias = "timeRemaining", alias = "timeRemainingSeconds")]
    #[validate(range(min = 0, message = "time_remaining_seconds must be non-negative"))]
    pub(crate) time_remaining_seconds: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AttemptListQuery {
    #[serde(default)]
    pub(crate) exam_id: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, message = "skip must be non-negative"))]
    pub(crate) skip: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    pub(crate) limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) question_id: String,
    pub(crate) section_id: String,
    pub(crate) marks: f64,
    pub(crate) negative_marks: f64,
    pub(crate) answer: Option<serde_json::Value>,
    pub(crate) score: Option<f64>,
    pub(crate) is_correct: Option<bool>,
    pub(crate) time_spent_seconds: u64,
    pub(crate) marked_for_review: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) user_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: String,
    pub(crate) expires_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) answers: Vec<AnswerResponse>,
    pub(crate) section_stats: Vec<SectionStats>,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: Option<i32>,
    pub(crate) time_remaining_seconds: i64,
    pub(crate) rank: Option<i32>,
    pub(crate) percentile: Option<i32>,
    pub(crate) submission_trigger: Option<SubmissionTrigger>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerGradedResponse {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) score: f64,
    pub(crate) is_correct: bool,
    pub(crate) time_spent_seconds: u64,
    pub(crate) live_total_score: f64,
    pub(crate) time_remaining_seconds: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewResponse {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) marked_for_review: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) attempt_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: i32,
    pub(crate) submitted_at: String,
    pub(crate) submission_trigger: SubmissionTrigger,
    pub(crate) rank: Option<i32>,
    pub(crate) percentile: Option<i32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TimeSyncResponse {
    pub(crate) attempt_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) time_remaining_seconds: i64,
    pub(crate) submission: Option<SubmissionResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StandingResponse {
    pub(crate) rank: i32,
    pub(crate) percentile: i32,
    pub(crate) attempt_id: String,
    pub(crate) user_id: String,
    pub(crate) total_score: f64,
    pub(crate) percentage: Option<i32>,
    pub(crate) submitted_at: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StandingsResponse {
    pub(crate) exam_id: String,
    pub(crate) population: usize,
    pub(crate) standings: Vec<StandingResponse>,
}

impl AttemptListQuery {
    pub(crate) fn skip(&self) -> i64 {
        self.skip.unwrap_or(0)
    }

    pub(crate) fn limit(&self) -> i64 {
        self.limit.unwrap_or(100)
    }
}

impl From<&AnswerRecord> for AnswerResponse {
    fn from(record: &AnswerRecord) -> Self {
        Self {
            question_id: record.question_id.clone(),
            section_id: record.section_id.clone(),
            marks: record.marks,
            negative_marks: record.negative_marks,
            answer: record.answer.as_ref().map(|answer| answer.to_json()),
            score: record.score,
            is_correct: record.is_correct,
            time_spent_seconds: record.time_spent_seconds,
            marked_for_review: record.marked_for_review,
        }
    }
}

impl From<&ExamAttempt> for AttemptResponse {
    fn from(attempt: &ExamAttempt) -> Self {
        Self {
            id: attempt.id.clone(),
            exam_id: attempt.exam_id.clone(),
            user_id: attempt.user_id.clone(),
            status: attempt.status,
            attempt_number: attempt.attempt_number,
            started_at: format_primitive(attempt.started_at),
            expires_at: format_primitive(attempt.expires_at),
            submitted_at: attempt.submitted_at.map(format_primitive),
            answers: attempt.answers.0.iter().map(AnswerResponse::from).collect(),
            section_stats: attempt.section_stats.0.clone(),
            total_score: attempt.total_score,
            max_score: attempt.max_score,
            percentage: attempt.percentage,
            time_remaining_seconds: attempt.time_remaining_seconds,
            rank: attempt.rank,
            percentile: attempt.percentile,
            submission_trigger: attempt.submission_trigger,
        }
    }
}

impl AnswerGradedResponse {
    pub(crate) fn new(attempt: &ExamAttempt, outcome: AnswerOutcome) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            question_id: outcome.question_id,
            status: attempt.status,
            score: outcome.score,
            is_correct: outcome.is_correct,
            time_spent_seconds: outcome.time_spent_seconds,
            live_total_score: outcome.live_total_score,
            time_remaining_seconds: attempt.time_remaining_seconds,
        }
    }
}

impl SubmissionResponse {
    pub(crate) fn new(attempt: &ExamAttempt, outcome: &SubmissionOutcome) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            status: attempt.status,
            total_score: outcome.total_score,
            max_score: outcome.max_score,
            percentage: outcome.percentage,
            submitted_at: format_primitive(outcome.submitted_at),
            submission_trigger: outcome.trigger,
            rank: attempt.rank,
            percentile: attempt.percentile,
        }
    }
}

impl From<StandingRow> for StandingResponse {
    fn from(row: StandingRow) -> Self {
        Self {
            rank: row.standing.rank,
            percentile: row.standing.percentile,
            attempt_id: row.entry.attempt_id,
            user_id: row.entry.user_id,
            total_score: row.entry.total_score,
            percentage: row.entry.percentage,
            submitted_at: format_primitive(row.entry.submitted_at),
        }
    }
}

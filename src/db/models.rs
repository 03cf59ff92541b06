use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AccessMode, AnswerValue, AttemptStatus, ExamStatus, SubmissionTrigger};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) duration_minutes: i32,
    pub(crate) max_attempts: i32,
    pub(crate) access_mode: AccessMode,
    pub(crate) status: ExamStatus,
    pub(crate) created_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// Question as stored by the authoring side. `question_type` and
/// `correct_answer` are validated when converted into an evaluator question.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionRow {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) section_id: String,
    pub(crate) ordinal: i32,
    pub(crate) question_type: String,
    pub(crate) options: Json<Vec<String>>,
    pub(crate) correct_answer: Json<serde_json::Value>,
    pub(crate) marks: f64,
    pub(crate) negative_marks: f64,
    pub(crate) tolerance: Option<f64>,
}

/// One question of an attempt. `marks` and `negative_marks` are captured when
/// the attempt starts and are what the answer is graded against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AnswerRecord {
    pub(crate) question_id: String,
    pub(crate) section_id: String,
    pub(crate) marks: f64,
    pub(crate) negative_marks: f64,
    pub(crate) answer: Option<AnswerValue>,
    pub(crate) score: Option<f64>,
    pub(crate) is_correct: Option<bool>,
    pub(crate) time_spent_seconds: u64,
    pub(crate) marked_for_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SectionStats {
    pub(crate) section_id: String,
    pub(crate) question_count: u32,
    pub(crate) answered_count: u32,
    pub(crate) marked_for_review_count: u32,
    pub(crate) time_spent_seconds: u64,
    pub(crate) score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamAttempt {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) user_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) expires_at: PrimitiveDateTime,
    pub(crate) answers: Json<Vec<AnswerRecord>>,
    pub(crate) section_stats: Json<Vec<SectionStats>>,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: Option<i32>,
    pub(crate) time_remaining_seconds: i64,
    pub(crate) rank: Option<i32>,
    pub(crate) percentile: Option<i32>,
    pub(crate) submission_trigger: Option<SubmissionTrigger>,
    pub(crate) version: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl ExamAttempt {
    pub(crate) fn answer(&self, question_id: &str) -> Option<&AnswerRecord> {
        self.answers.0.iter().find(|record| record.question_id == question_id)
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct RankingRow {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) total_score: f64,
    pub(crate) percentage: Option<i32>,
    pub(crate) submitted_at: PrimitiveDateTime,
}

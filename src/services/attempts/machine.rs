//! The exam-attempt state machine.
//!
//! `started -> in_progress -> submitted`, where `submitted` is terminal and can
//! be reached either by the user (`Completed`) or by the clock
//! (`TimeExpired`). Both events go through [`apply`] and share one
//! finalization path, so manual and automatic submission score identically.
//!
//! Nothing here touches the database; callers load the attempt under a row
//! lock, apply one event and persist the result.

use std::collections::BTreeMap;

use sqlx::types::Json;
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::time::seconds_until;
use crate::db::models::{AnswerRecord, Exam, ExamAttempt, SectionStats};
use crate::db::types::{AnswerValue, AttemptStatus, ExamStatus, SubmissionTrigger};
use crate::services::attempts::errors::AttemptError;
use crate::services::evaluator::{self, Question};

#[derive(Debug)]
pub(crate) enum AttemptEvent<'a> {
    AnswerSubmitted { question: &'a Question, answer: Option<AnswerValue>, time_spent_seconds: u64 },
    ReviewMarked { question_id: &'a str, marked: bool },
    TimeSynced { client_remaining_seconds: i64 },
    Completed,
    TimeExpired,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    AnswerGraded(AnswerOutcome),
    ReviewUpdated { question_id: String, marked: bool },
    TimeUpdated { time_remaining_seconds: i64 },
    Submitted(SubmissionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnswerOutcome {
    pub(crate) question_id: String,
    pub(crate) score: f64,
    pub(crate) is_correct: bool,
    pub(crate) time_spent_seconds: u64,
    pub(crate) live_total_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubmissionOutcome {
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: i32,
    pub(crate) submitted_at: PrimitiveDateTime,
    pub(crate) trigger: SubmissionTrigger,
}

pub(crate) fn ensure_exam_open(exam: &Exam, now: PrimitiveDateTime) -> Result<(), AttemptError> {
    if exam.status != ExamStatus::Published {
        return Err(AttemptError::ExamNotOpen);
    }
    if now < exam.start_time || now > exam.end_time {
        return Err(AttemptError::ExamNotOpen);
    }
    Ok(())
}

/// Builds a fresh attempt with one empty answer record per question, in
/// question order.
pub(crate) fn new_attempt(
    exam: &Exam,
    questions: &[Question],
    user_id: &str,
    attempt_number: i32,
    now: PrimitiveDateTime,
) -> ExamAttempt {
    let answers: Vec<AnswerRecord> = questions
        .iter()
        .map(|question| AnswerRecord {
            question_id: question.id.clone(),
            section_id: question.section_id.clone(),
            marks: question.marks,
            negative_marks: question.negative_marks,
            answer: None,
            score: None,
            is_correct: None,
            time_spent_seconds: 0,
            marked_for_review: false,
        })
        .collect();
    let section_stats = section_rollups(&answers);
    let duration_seconds = i64::from(exam.duration_minutes) * 60;

    ExamAttempt {
        id: Uuid::new_v4().to_string(),
        exam_id: exam.id.clone(),
        user_id: user_id.to_string(),
        status: AttemptStatus::Started,
        attempt_number,
        started_at: now,
        submitted_at: None,
        expires_at: now + Duration::seconds(duration_seconds),
        answers: Json(answers),
        section_stats: Json(section_stats),
        total_score: 0.0,
        max_score: questions.iter().map(|question| question.marks).sum(),
        percentage: None,
        time_remaining_seconds: duration_seconds,
        rank: None,
        percentile: None,
        submission_trigger: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// True when an active attempt has run past its deadline and must be closed
/// through `TimeExpired` before anything else happens to it.
pub(crate) fn is_overdue(attempt: &ExamAttempt, now: PrimitiveDateTime) -> bool {
    attempt.status.is_active()
        && (now >= attempt.expires_at || attempt.time_remaining_seconds <= 0)
}

pub(crate) fn ensure_active(attempt: &ExamAttempt) -> Result<(), AttemptError> {
    if attempt.status.is_active() {
        Ok(())
    } else {
        Err(AttemptError::AttemptNotActive)
    }
}

pub(crate) fn apply(
    attempt: &mut ExamAttempt,
    event: AttemptEvent<'_>,
    now: PrimitiveDateTime,
) -> Result<Transition, AttemptError> {
    match event {
        AttemptEvent::AnswerSubmitted { question, answer, time_spent_seconds } => {
            ensure_mutable(attempt, now)?;
            submit_answer(attempt, question, answer, time_spent_seconds, now)
        }
        AttemptEvent::ReviewMarked { question_id, marked } => {
            ensure_mutable(attempt, now)?;
            let record = attempt
                .answers
                .0
                .iter_mut()
                .find(|record| record.question_id == question_id)
                .ok_or_else(|| AttemptError::QuestionNotInAttempt(question_id.to_string()))?;
            record.marked_for_review = marked;
            touch(attempt, now);
            Ok(Transition::ReviewUpdated { question_id: question_id.to_string(), marked })
        }
        AttemptEvent::TimeSynced { client_remaining_seconds } => {
            ensure_mutable(attempt, now)?;
            let remaining = attempt
                .time_remaining_seconds
                .min(client_remaining_seconds.max(0))
                .min(seconds_until(now, attempt.expires_at));
            attempt.time_remaining_seconds = remaining;
            if remaining == 0 {
                return Ok(Transition::Submitted(finalize(
                    attempt,
                    SubmissionTrigger::TimeExpired,
                    now,
                )));
            }
            touch(attempt, now);
            Ok(Transition::TimeUpdated { time_remaining_seconds: remaining })
        }
        AttemptEvent::Completed => {
            ensure_not_submitted(attempt)?;
            let trigger = if is_overdue(attempt, now) {
                SubmissionTrigger::TimeExpired
            } else {
                SubmissionTrigger::Manual
            };
            Ok(Transition::Submitted(finalize(attempt, trigger, now)))
        }
        AttemptEvent::TimeExpired => {
            ensure_not_submitted(attempt)?;
            Ok(Transition::Submitted(finalize(attempt, SubmissionTrigger::TimeExpired, now)))
        }
    }
}

fn submit_answer(
    attempt: &mut ExamAttempt,
    question: &Question,
    answer: Option<AnswerValue>,
    time_spent_seconds: u64,
    now: PrimitiveDateTime,
) -> Result<Transition, AttemptError> {
    let record = attempt
        .answers
        .0
        .iter_mut()
        .find(|record| record.question_id == question.id)
        .ok_or_else(|| AttemptError::QuestionNotInAttempt(question.id.clone()))?;

    let captured = Question {
        marks: record.marks,
        negative_marks: record.negative_marks,
        ..question.clone()
    };
    let grade = evaluator::evaluate(&captured, answer.as_ref())?;

    record.answer = answer;
    record.score = Some(grade.score);
    record.is_correct = Some(grade.is_correct);
    record.time_spent_seconds = record.time_spent_seconds.saturating_add(time_spent_seconds);
    let time_spent = record.time_spent_seconds;

    if attempt.status == AttemptStatus::Started {
        attempt.status = AttemptStatus::InProgress;
    }
    attempt.total_score = graded_total(&attempt.answers.0);
    touch(attempt, now);

    Ok(Transition::AnswerGraded(AnswerOutcome {
        question_id: question.id.clone(),
        score: grade.score,
        is_correct: grade.is_correct,
        time_spent_seconds: time_spent,
        live_total_score: attempt.total_score,
    }))
}

/// Closes the attempt. The total is always re-derived from the answer
/// records, never carried over from the live running value.
fn finalize(
    attempt: &mut ExamAttempt,
    trigger: SubmissionTrigger,
    now: PrimitiveDateTime,
) -> SubmissionOutcome {
    let submitted_at = match trigger {
        SubmissionTrigger::Manual => now,
        SubmissionTrigger::TimeExpired => now.min(attempt.expires_at),
    };

    let total_score = graded_total(&attempt.answers.0);
    let percentage = percentage(total_score, attempt.max_score);

    attempt.status = AttemptStatus::Submitted;
    attempt.total_score = total_score;
    attempt.percentage = Some(percentage);
    attempt.submitted_at = Some(submitted_at);
    attempt.submission_trigger = Some(trigger);
    attempt.rank = None;
    attempt.percentile = None;
    if trigger == SubmissionTrigger::TimeExpired {
        attempt.time_remaining_seconds = 0;
    } else {
        attempt.time_remaining_seconds =
            attempt.time_remaining_seconds.min(seconds_until(now, attempt.expires_at));
    }
    touch(attempt, now);

    SubmissionOutcome {
        total_score,
        max_score: attempt.max_score,
        percentage,
        submitted_at,
        trigger,
    }
}

pub(crate) fn graded_total(answers: &[AnswerRecord]) -> f64 {
    answers.iter().filter_map(|record| record.score).sum()
}

/// `total / max * 100`, rounded half away from zero. An exam worth nothing
/// reports 0.
pub(crate) fn percentage(total_score: f64, max_score: f64) -> i32 {
    if max_score <= 0.0 {
        return 0;
    }
    (total_score / max_score * 100.0).round() as i32
}

pub(crate) fn section_rollups(answers: &[AnswerRecord]) -> Vec<SectionStats> {
    let mut order: Vec<&str> = Vec::new();
    let mut sections: BTreeMap<&str, SectionStats> = BTreeMap::new();

    for record in answers {
        let stats = sections.entry(record.section_id.as_str()).or_insert_with(|| {
            order.push(record.section_id.as_str());
            SectionStats {
                section_id: record.section_id.clone(),
                question_count: 0,
                answered_count: 0,
                marked_for_review_count: 0,
                time_spent_seconds: 0,
                score: 0.0,
            }
        });
        stats.question_count += 1;
        if record.answer.is_some() {
            stats.answered_count += 1;
        }
        if record.marked_for_review {
            stats.marked_for_review_count += 1;
        }
        stats.time_spent_seconds = stats.time_spent_seconds.saturating_add(record.time_spent_seconds);
        stats.score += record.score.unwrap_or(0.0);
    }

    order.into_iter().filter_map(|section_id| sections.remove(section_id)).collect()
}

fn ensure_not_submitted(attempt: &ExamAttempt) -> Result<(), AttemptError> {
    if attempt.status == AttemptStatus::Submitted {
        Err(AttemptError::AlreadySubmitted)
    } else {
        Ok(())
    }
}

fn ensure_mutable(attempt: &ExamAttempt, now: PrimitiveDateTime) -> Result<(), AttemptError> {
    ensure_active(attempt)?;
    if now >= attempt.expires_at {
        return Err(AttemptError::AttemptNotActive);
    }
    Ok(())
}

fn touch(attempt: &mut ExamAttempt, now: PrimitiveDateTime) {
    attempt.time_remaining_seconds =
        attempt.time_remaining_seconds.min(seconds_until(now, attempt.expires_at));
    attempt.section_stats = Json(section_rollups(&attempt.answers.0));
    attempt.updated_at = now;
}

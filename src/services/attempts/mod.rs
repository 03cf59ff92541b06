//! Attempt orchestration: loads state under the right locks, feeds one event
//! through the state machine and persists the result.
//!
//! Every mutation runs in its own transaction holding the attempt's row lock,
//! and the write is additionally guarded by the `version` column. Attempts of
//! different users or exams never share a lock.

pub(crate) mod errors;
pub(crate) mod machine;

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::ExamAttempt;
use crate::repositories;
use crate::services::evaluator::{self, Question};
use crate::services::exam_access;
use crate::services::ranking::{self, RankingEntry, Standing};

pub(crate) use errors::AttemptError;
pub(crate) use machine::{AnswerOutcome, SubmissionOutcome, Transition};

use machine::AttemptEvent;

const SWEEP_BATCH_SIZE: i64 = 200;

/// The attempt after a mutation, together with what the mutation did.
#[derive(Debug)]
pub(crate) struct AttemptUpdate<T> {
    pub(crate) attempt: ExamAttempt,
    pub(crate) outcome: T,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StandingRow {
    pub(crate) entry: RankingEntry,
    pub(crate) standing: Standing,
}

pub(crate) async fn start_attempt(
    pool: &PgPool,
    exam_id: &str,
    user_id: &str,
) -> Result<ExamAttempt, AttemptError> {
    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;

    let exam = repositories::exams::find_by_id(&mut *tx, exam_id)
        .await?
        .ok_or(AttemptError::ExamNotFound)?;
    machine::ensure_exam_open(&exam, now)?;

    if !exam_access::may_attempt(&mut *tx, &exam, user_id).await? {
        return Err(AttemptError::AccessDenied);
    }

    repositories::attempts::lock_exam_user(&mut *tx, exam_id, user_id).await?;

    let mut expired = None;
    if let Some(active) = repositories::attempts::find_active(&mut *tx, exam_id, user_id).await? {
        if !machine::is_overdue(&active, now) {
            return Err(AttemptError::AttemptAlreadyActive { attempt_id: active.id });
        }
        let mut active = load_for_update(&mut tx, &active.id, user_id).await?;
        expire_locked(&mut tx, &mut active, now).await?;
        expired = Some(active);
    }

    let used = repositories::attempts::count_by_exam_and_user(&mut *tx, exam_id, user_id).await?;
    if used >= i64::from(exam.max_attempts) {
        if expired.is_some() {
            tx.commit().await?;
            rank_after_submission(pool, expired.as_mut()).await;
        }
        return Err(AttemptError::AttemptLimitReached { max_attempts: exam.max_attempts });
    }

    let questions = repositories::questions::list_by_exam(&mut *tx, exam_id)
        .await?
        .into_iter()
        .map(Question::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            tracing::error!(exam_id, error = %err, "Exam contains an invalid question");
            AttemptError::Evaluation(err)
        })?;

    let attempt_number = i32::try_from(used + 1).unwrap_or(i32::MAX);
    let attempt = machine::new_attempt(&exam, &questions, user_id, attempt_number, now);
    repositories::attempts::insert(&mut *tx, &attempt).await?;
    tx.commit().await?;

    if expired.is_some() {
        rank_after_submission(pool, expired.as_mut()).await;
    }

    metrics::counter!("attempts_started_total").increment(1);
    tracing::info!(
        exam_id,
        user_id,
        attempt_id = %attempt.id,
        attempt_number,
        questions = questions.len(),
        "Exam attempt started"
    );

    Ok(attempt)
}

pub(crate) async fn submit_answer(
    pool: &PgPool,
    user_id: &str,
    attempt_id: &str,
    question_id: &str,
    raw_answer: &Value,
    time_spent_seconds: u64,
) -> Result<AttemptUpdate<AnswerOutcome>, AttemptError> {
    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;
    let mut attempt = load_for_update(&mut tx, attempt_id, user_id).await?;
    if machine::is_overdue(&attempt, now) {
        return expire_and_reject(pool, tx, attempt, now).await;
    }
    machine::ensure_active(&attempt)?;

    if attempt.answer(question_id).is_none() {
        return Err(AttemptError::QuestionNotInAttempt(question_id.to_string()));
    }

    let row = repositories::questions::find_in_exam(&mut *tx, &attempt.exam_id, question_id)
        .await?
        .ok_or_else(|| AttemptError::QuestionNotInAttempt(question_id.to_string()))?;
    let question = Question::try_from(row).map_err(|err| {
        tracing::error!(question_id, error = %err, "Stored question failed validation");
        AttemptError::Evaluation(err)
    })?;
    let answer = evaluator::parse_optional_answer(question.question_type, raw_answer)
        .map_err(AttemptError::InvalidAnswer)?;

    let transition = machine::apply(
        &mut attempt,
        AttemptEvent::AnswerSubmitted { question: &question, answer, time_spent_seconds },
        now,
    )
    .map_err(log_integrity_failure)?;
    persist(&mut tx, &mut attempt).await?;
    tx.commit().await?;

    let Transition::AnswerGraded(outcome) = transition else {
        return Err(AttemptError::StaleAttempt);
    };
    metrics::counter!("answers_graded_total").increment(1);
    tracing::debug!(
        attempt_id,
        question_id,
        score = outcome.score,
        live_total = outcome.live_total_score,
        "Answer graded"
    );

    Ok(AttemptUpdate { attempt, outcome })
}

pub(crate) async fn mark_for_review(
    pool: &PgPool,
    user_id: &str,
    attempt_id: &str,
    question_id: &str,
    marked: bool,
) -> Result<ExamAttempt, AttemptError> {
    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;
    let mut attempt = load_for_update(&mut tx, attempt_id, user_id).await?;
    if machine::is_overdue(&attempt, now) {
        return expire_and_reject(pool, tx, attempt, now).await;
    }

    machine::apply(&mut attempt, AttemptEvent::ReviewMarked { question_id, marked }, now)?;
    persist(&mut tx, &mut attempt).await?;
    tx.commit().await?;

    Ok(attempt)
}

/// Reconciles the remaining time with the client's clock. Reaching zero
/// submits the attempt through `TimeExpired`.
pub(crate) async fn sync_time(
    pool: &PgPool,
    user_id: &str,
    attempt_id: &str,
    client_remaining_seconds: i64,
) -> Result<AttemptUpdate<Transition>, AttemptError> {
    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;
    let mut attempt = load_for_update(&mut tx, attempt_id, user_id).await?;
    if machine::is_overdue(&attempt, now) {
        return expire_and_reject(pool, tx, attempt, now).await;
    }

    let transition = machine::apply(
        &mut attempt,
        AttemptEvent::TimeSynced { client_remaining_seconds },
        now,
    )?;
    persist(&mut tx, &mut attempt).await?;
    tx.commit().await?;

    if let Transition::Submitted(outcome) = &transition {
        record_submission(&attempt, outcome);
        rank_after_submission(pool, Some(&mut attempt)).await;
    }

    Ok(AttemptUpdate { attempt, outcome: transition })
}

/// Submits the attempt. After the deadline the submission is recorded as
/// expired, with the deadline as its submission time.
pub(crate) async fn complete_attempt(
    pool: &PgPool,
    user_id: &str,
    attempt_id: &str,
) -> Result<AttemptUpdate<SubmissionOutcome>, AttemptError> {
    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;
    let mut attempt = load_for_update(&mut tx, attempt_id, user_id).await?;

    let transition = machine::apply(&mut attempt, AttemptEvent::Completed, now)?;
    persist(&mut tx, &mut attempt).await?;
    tx.commit().await?;

    let Transition::Submitted(outcome) = transition else {
        return Err(AttemptError::StaleAttempt);
    };
    record_submission(&attempt, &outcome);
    rank_after_submission(pool, Some(&mut attempt)).await;

    Ok(AttemptUpdate { attempt, outcome })
}

pub(crate) async fn get_attempt(
    pool: &PgPool,
    user_id: &str,
    attempt_id: &str,
) -> Result<ExamAttempt, AttemptError> {
    repositories::attempts::find_by_id(pool, attempt_id)
        .await?
        .filter(|attempt| attempt.user_id == user_id)
        .ok_or(AttemptError::AttemptNotFound)
}

pub(crate) async fn list_my_attempts(
    pool: &PgPool,
    user_id: &str,
    exam_id: Option<&str>,
    skip: i64,
    limit: i64,
) -> Result<Vec<ExamAttempt>, AttemptError> {
    Ok(repositories::attempts::list_by_user(pool, user_id, exam_id, skip, limit).await?)
}

/// Current ordering of every submitted attempt of the exam.
pub(crate) async fn standings(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<StandingRow>, AttemptError> {
    repositories::exams::find_by_id(pool, exam_id).await?.ok_or(AttemptError::ExamNotFound)?;

    let ordered = ranking::load_ordered(pool, exam_id).await?;
    let population = i32::try_from(ordered.len()).unwrap_or(i32::MAX);
    Ok(ordered
        .into_iter()
        .zip(1..)
        .map(|(entry, rank)| StandingRow {
            entry,
            standing: Standing {
                rank,
                percentile: ranking::percentile(rank, population),
                population,
            },
        })
        .collect())
}

/// Feeds `TimeExpired` to every active attempt past its deadline. Returns how
/// many attempts were closed.
pub(crate) async fn expire_overdue_attempts(pool: &PgPool) -> Result<usize, AttemptError> {
    let now = primitive_now_utc();
    let ids = repositories::attempts::list_overdue_ids(pool, now, SWEEP_BATCH_SIZE).await?;

    let mut closed = 0;
    for attempt_id in ids {
        match expire_one(pool, &attempt_id, now).await {
            Ok(true) => closed += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(attempt_id, error = %err, "Failed to auto-submit overdue attempt");
            }
        }
    }

    if closed > 0 {
        tracing::info!(closed, "Overdue attempts auto-submitted");
    }
    Ok(closed)
}

/// Ranks submitted attempts whose rank is still missing, one population load
/// per exam.
pub(crate) async fn retry_missing_rankings(pool: &PgPool) -> Result<usize, AttemptError> {
    let pending = repositories::attempts::list_unranked(pool, SWEEP_BATCH_SIZE).await?;

    let mut by_exam: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (attempt_id, exam_id) in pending {
        by_exam.entry(exam_id).or_default().push(attempt_id);
    }

    let mut ranked = 0;
    for (exam_id, attempt_ids) in by_exam {
        let ordered = match ranking::load_ordered(pool, &exam_id).await {
            Ok(ordered) => ordered,
            Err(err) => {
                metrics::counter!("ranking_failures_total").increment(1);
                tracing::warn!(exam_id, error = %err, "Failed to load ranking population");
                continue;
            }
        };

        for attempt_id in attempt_ids {
            let Some(standing) = ranking::standing_of(&ordered, &attempt_id) else {
                continue;
            };
            match repositories::attempts::set_ranking(
                pool,
                &attempt_id,
                standing.rank,
                standing.percentile,
            )
            .await
            {
                Ok(()) => ranked += 1,
                Err(err) => {
                    metrics::counter!("ranking_failures_total").increment(1);
                    tracing::warn!(attempt_id, error = %err, "Failed to store ranking");
                }
            }
        }
    }

    if ranked > 0 {
        tracing::info!(ranked, "Missing rankings recomputed");
    }
    Ok(ranked)
}

async fn expire_one(
    pool: &PgPool,
    attempt_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, AttemptError> {
    let mut tx = pool.begin().await?;
    let Some(mut attempt) = repositories::attempts::lock_by_id(&mut *tx, attempt_id).await? else {
        return Ok(false);
    };
    if !machine::is_overdue(&attempt, now) {
        return Ok(false);
    }

    expire_locked(&mut tx, &mut attempt, now).await?;
    tx.commit().await?;
    rank_after_submission(pool, Some(&mut attempt)).await;
    Ok(true)
}

async fn load_for_update(
    tx: &mut Transaction<'_, Postgres>,
    attempt_id: &str,
    user_id: &str,
) -> Result<ExamAttempt, AttemptError> {
    repositories::attempts::lock_by_id(&mut **tx, attempt_id)
        .await?
        .filter(|attempt| attempt.user_id == user_id)
        .ok_or(AttemptError::AttemptNotFound)
}

/// A mutation that arrives after the deadline closes the attempt first and is
/// then rejected. The expiry is committed before the error is returned.
async fn expire_and_reject<T>(
    pool: &PgPool,
    mut tx: Transaction<'_, Postgres>,
    mut attempt: ExamAttempt,
    now: PrimitiveDateTime,
) -> Result<T, AttemptError> {
    expire_locked(&mut tx, &mut attempt, now).await?;
    tx.commit().await?;
    rank_after_submission(pool, Some(&mut attempt)).await;
    Err(AttemptError::AttemptNotActive)
}

async fn expire_locked(
    tx: &mut Transaction<'_, Postgres>,
    attempt: &mut ExamAttempt,
    now: PrimitiveDateTime,
) -> Result<(), AttemptError> {
    let transition = machine::apply(attempt, AttemptEvent::TimeExpired, now)?;
    persist(tx, attempt).await?;
    if let Transition::Submitted(outcome) = &transition {
        record_submission(attempt, outcome);
    }
    Ok(())
}

async fn persist(
    tx: &mut Transaction<'_, Postgres>,
    attempt: &mut ExamAttempt,
) -> Result<(), AttemptError> {
    if !repositories::attempts::save(&mut **tx, attempt).await? {
        return Err(AttemptError::StaleAttempt);
    }
    attempt.version += 1;
    Ok(())
}

/// Ranking is best effort: a failure leaves rank empty for the retry sweep and
/// never undoes the submission.
async fn rank_after_submission(pool: &PgPool, attempt: Option<&mut ExamAttempt>) {
    let Some(attempt) = attempt else {
        return;
    };

    match ranking::compute_rank_and_percentile(pool, &attempt.exam_id, &attempt.id).await {
        Ok(Some(standing)) => {
            attempt.rank = Some(standing.rank);
            attempt.percentile = Some(standing.percentile);
        }
        Ok(None) => {}
        Err(err) => {
            metrics::counter!("ranking_failures_total").increment(1);
            tracing::warn!(
                attempt_id = %attempt.id,
                exam_id = %attempt.exam_id,
                error = %err,
                "Ranking failed; left for the retry sweep"
            );
        }
    }
}

fn record_submission(attempt: &ExamAttempt, outcome: &SubmissionOutcome) {
    metrics::counter!("attempts_submitted_total", "trigger" => outcome.trigger.as_str())
        .increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        exam_id = %attempt.exam_id,
        user_id = %attempt.user_id,
        trigger = outcome.trigger.as_str(),
        total_score = outcome.total_score,
        max_score = outcome.max_score,
        percentage = outcome.percentage,
        "Exam attempt submitted"
    );
}

fn log_integrity_failure(err: AttemptError) -> AttemptError {
    if let AttemptError::Evaluation(inner) = &err {
        tracing::error!(error = %inner, "Answer evaluation failed on stored data");
    }
    err
}

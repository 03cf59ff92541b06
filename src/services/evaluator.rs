//! Scoring rules for the five supported question types.
//!
//! Everything here is pure: no I/O, no clock, no shared state. Both the attempt
//! state machine and question validation call into it.

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::db::models::QuestionRow;
use crate::db::types::{AnswerValue, QuestionType};

#[derive(Debug, Clone, PartialEq, Error)]
pub(crate) enum EvaluationError {
    #[error("invalid question type: {0}")]
    InvalidQuestionType(String),
    #[error("malformed answer for {question_type} question: expected {expected}")]
    MalformedAnswer { question_type: QuestionType, expected: &'static str },
    #[error("question {question_id} is invalid: {reason}")]
    InvalidQuestion { question_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) section_id: String,
    pub(crate) ordinal: i32,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<String>,
    pub(crate) correct_answer: AnswerValue,
    pub(crate) marks: f64,
    pub(crate) negative_marks: f64,
    pub(crate) tolerance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Grade {
    pub(crate) score: f64,
    pub(crate) is_correct: bool,
}

impl TryFrom<QuestionRow> for Question {
    type Error = EvaluationError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let question_type = row
            .question_type
            .parse::<QuestionType>()
            .map_err(EvaluationError::InvalidQuestionType)?;
        let correct_answer = parse_answer(question_type, &row.correct_answer.0)?;

        let invalid = |reason: &str| EvaluationError::InvalidQuestion {
            question_id: row.id.clone(),
            reason: reason.to_string(),
        };

        if !(row.marks.is_finite() && row.marks >= 0.0) {
            return Err(invalid("marks must be a non-negative number"));
        }
        if !(row.negative_marks.is_finite() && row.negative_marks >= 0.0) {
            return Err(invalid("negative marks must be a non-negative number"));
        }
        if matches!(question_type, QuestionType::McqSingle | QuestionType::McqMultiple)
            && row.options.0.len() < 2
        {
            return Err(invalid("multiple-choice questions need at least two options"));
        }
        if matches!(&correct_answer, AnswerValue::Choices(correct) if correct.is_empty()) {
            return Err(invalid("multiple-choice questions need at least one correct option"));
        }
        if let Some(tolerance) = row.tolerance {
            if question_type != QuestionType::Numerical {
                return Err(invalid("tolerance is only allowed on numerical questions"));
            }
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(invalid("tolerance must be a non-negative number"));
            }
        }

        Ok(Question {
            id: row.id,
            exam_id: row.exam_id,
            section_id: row.section_id,
            ordinal: row.ordinal,
            question_type,
            options: if question_type.has_options() { row.options.0 } else { Vec::new() },
            correct_answer,
            marks: row.marks,
            negative_marks: row.negative_marks,
            tolerance: row.tolerance,
        })
    }
}

/// Parses a wire value into the answer shape required by `question_type`.
///
/// Integers and decimals stay distinct: `4.0` is not an `Integer` answer and
/// fractional values are rejected rather than truncated.
pub(crate) fn parse_answer(
    question_type: QuestionType,
    value: &Value,
) -> Result<AnswerValue, EvaluationError> {
    let malformed =
        |expected: &'static str| EvaluationError::MalformedAnswer { question_type, expected };

    match question_type {
        QuestionType::McqSingle => value
            .as_str()
            .map(|choice| AnswerValue::Choice(choice.to_string()))
            .ok_or_else(|| malformed("a single option string")),
        QuestionType::McqMultiple => {
            let items = value.as_array().ok_or_else(|| malformed("an array of option strings"))?;
            let mut choices = BTreeSet::new();
            for item in items {
                let choice = item.as_str().ok_or_else(|| malformed("an array of option strings"))?;
                choices.insert(choice.to_string());
            }
            Ok(AnswerValue::Choices(choices))
        }
        QuestionType::TrueFalse => {
            value.as_bool().map(AnswerValue::Boolean).ok_or_else(|| malformed("a boolean"))
        }
        QuestionType::Integer => {
            value.as_i64().map(AnswerValue::Integer).ok_or_else(|| malformed("an integer"))
        }
        QuestionType::Numerical => value
            .as_f64()
            .filter(|number| number.is_finite())
            .map(AnswerValue::Decimal)
            .ok_or_else(|| malformed("a finite number")),
    }
}

/// Like [`parse_answer`], but `null` means the question was left unattempted.
pub(crate) fn parse_optional_answer(
    question_type: QuestionType,
    value: &Value,
) -> Result<Option<AnswerValue>, EvaluationError> {
    if value.is_null() {
        return Ok(None);
    }
    parse_answer(question_type, value).map(Some)
}

pub(crate) fn is_correct(
    question: &Question,
    answer: Option<&AnswerValue>,
) -> Result<bool, EvaluationError> {
    let Some(answer) = answer else {
        return Ok(false);
    };

    let malformed = |expected: &'static str| EvaluationError::MalformedAnswer {
        question_type: question.question_type,
        expected,
    };

    match (question.question_type, &question.correct_answer, answer) {
        (QuestionType::McqSingle, AnswerValue::Choice(correct), AnswerValue::Choice(given)) => {
            Ok(correct == given)
        }
        (
            QuestionType::McqMultiple,
            AnswerValue::Choices(correct),
            AnswerValue::Choices(given),
        ) => Ok(correct == given),
        (QuestionType::TrueFalse, AnswerValue::Boolean(correct), AnswerValue::Boolean(given)) => {
            Ok(correct == given)
        }
        (QuestionType::Integer, AnswerValue::Integer(correct), AnswerValue::Integer(given)) => {
            Ok(correct == given)
        }
        (QuestionType::Numerical, AnswerValue::Decimal(correct), AnswerValue::Decimal(given)) => {
            let tolerance = question.tolerance.unwrap_or(0.0);
            Ok((given - correct).abs() <= tolerance)
        }
        (question_type, correct, _) if !shape_matches(question_type, correct) => {
            Err(EvaluationError::InvalidQuestion {
                question_id: question.id.clone(),
                reason: format!("correct answer is {}", correct.shape()),
            })
        }
        (question_type, _, _) => Err(malformed(expected_shape(question_type))),
    }
}

/// Full marks when correct, minus the negative marks when attempted and
/// wrong, and exactly zero when unattempted. A multiple-choice selection that
/// is a strict subset or superset of the correct set earns zero, never a
/// penalty.
pub(crate) fn calculate_score(
    question: &Question,
    answer: Option<&AnswerValue>,
) -> Result<f64, EvaluationError> {
    let correct = is_correct(question, answer)?;

    Ok(match answer {
        None => 0.0,
        Some(_) if correct => question.marks,
        Some(given) if nests_within(&question.correct_answer, given) => 0.0,
        Some(_) if question.negative_marks > 0.0 => -question.negative_marks,
        Some(_) => 0.0,
    })
}

/// Correctness and score together, as stored on an answer record.
pub(crate) fn evaluate(
    question: &Question,
    answer: Option<&AnswerValue>,
) -> Result<Grade, EvaluationError> {
    let is_correct = is_correct(question, answer)?;
    let score = calculate_score(question, answer)?;
    Ok(Grade { score, is_correct })
}

/// Strict subset or superset of the correct selection. The empty selection
/// is a subset of every correct set.
fn nests_within(correct: &AnswerValue, given: &AnswerValue) -> bool {
    match (correct, given) {
        (AnswerValue::Choices(correct), AnswerValue::Choices(given)) => {
            correct != given && (given.is_subset(correct) || given.is_superset(correct))
        }
        _ => false,
    }
}

fn shape_matches(question_type: QuestionType, value: &AnswerValue) -> bool {
    matches!(
        (question_type, value),
        (QuestionType::McqSingle, AnswerValue::Choice(_))
            | (QuestionType::McqMultiple, AnswerValue::Choices(_))
            | (QuestionType::TrueFalse, AnswerValue::Boolean(_))
            | (QuestionType::Integer, AnswerValue::Integer(_))
            | (QuestionType::Numerical, AnswerValue::Decimal(_))
    )
}

fn expected_shape(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::McqSingle => "a single option string",
        QuestionType::McqMultiple => "an array of option strings",
        QuestionType::TrueFalse => "a boolean",
        QuestionType::Integer => "an integer",
        QuestionType::Numerical => "a finite number",
    }
}

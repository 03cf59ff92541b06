use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UserRole {
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    pub(crate) fn can_review(self) -> bool {
        matches!(self, UserRole::Teacher | UserRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "examstatus", rename_all = "lowercase")]
pub(crate) enum ExamStatus {
    Draft,
    Published,
    Archived,
}

/// How the enrollment collaborator decides who may attempt an exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "examaccessmode", rename_all = "lowercase")]
pub(crate) enum AccessMode {
    Open,
    Enrolled,
}

/// Attempt lifecycle. Variants are declared in transition order and never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub(crate) enum AttemptStatus {
    Started,
    InProgress,
    Submitted,
}

impl AttemptStatus {
    pub(crate) fn is_active(self) -> bool {
        matches!(self, AttemptStatus::Started | AttemptStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submissiontrigger", rename_all = "snake_case")]
pub(crate) enum SubmissionTrigger {
    Manual,
    TimeExpired,
}

impl SubmissionTrigger {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SubmissionTrigger::Manual => "manual",
            SubmissionTrigger::TimeExpired => "time_expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum QuestionType {
    #[serde(rename = "MCQ_Single")]
    McqSingle,
    #[serde(rename = "MCQ_Multiple")]
    McqMultiple,
    TrueFalse,
    Integer,
    Numerical,
}

impl QuestionType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            QuestionType::McqSingle => "MCQ_Single",
            QuestionType::McqMultiple => "MCQ_Multiple",
            QuestionType::TrueFalse => "TrueFalse",
            QuestionType::Integer => "Integer",
            QuestionType::Numerical => "Numerical",
        }
    }

    pub(crate) fn has_options(self) -> bool {
        matches!(self, QuestionType::McqSingle | QuestionType::McqMultiple | QuestionType::TrueFalse)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "MCQ_Single" => Ok(QuestionType::McqSingle),
            "MCQ_Multiple" => Ok(QuestionType::McqMultiple),
            "TrueFalse" => Ok(QuestionType::TrueFalse),
            "Integer" => Ok(QuestionType::Integer),
            "Numerical" => Ok(QuestionType::Numerical),
            other => Err(other.to_string()),
        }
    }
}

/// A typed answer value. The variant is fixed by the question type at the
/// deserialization boundary, so scoring never has to guess a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub(crate) enum AnswerValue {
    Choice(String),
    Choices(BTreeSet<String>),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
}

impl AnswerValue {
    pub(crate) fn shape(&self) -> &'static str {
        match self {
            AnswerValue::Choice(_) => "a single option",
            AnswerValue::Choices(_) => "a set of options",
            AnswerValue::Boolean(_) => "a boolean",
            AnswerValue::Integer(_) => "an integer",
            AnswerValue::Decimal(_) => "a number",
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            AnswerValue::Choice(value) => serde_json::Value::String(value.clone()),
            AnswerValue::Choices(values) => serde_json::Value::Array(
                values.iter().cloned().map(serde_json::Value::String).collect(),
            ),
            AnswerValue::Boolean(value) => serde_json::Value::Bool(*value),
            AnswerValue::Integer(value) => serde_json::Value::from(*value),
            AnswerValue::Decimal(value) => serde_json::Value::from(*value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_type_parses_wire_names() {
        assert_eq!("MCQ_Multiple".parse::<QuestionType>(), Ok(QuestionType::McqMultiple));
        assert_eq!("TrueFalse".parse::<QuestionType>(), Ok(QuestionType::TrueFalse));
        assert_eq!("Essay".parse::<QuestionType>(), Err("Essay".to_string()));
    }

    #[test]
    fn attempt_status_orders_by_lifecycle() {
        assert!(AttemptStatus::Started < AttemptStatus::InProgress);
        assert!(AttemptStatus::InProgress < AttemptStatus::Submitted);
        assert!(!AttemptStatus::Submitted.is_active());
    }

    #[test]
    fn stored_answer_keeps_integer_and_decimal_apart() {
        let integer = serde_json::to_value(AnswerValue::Integer(4)).unwrap();
        let decimal = serde_json::to_value(AnswerValue::Decimal(4.0)).unwrap();
        assert_eq!(integer, serde_json::json!({"kind": "integer", "value": 4}));
        assert_eq!(decimal["kind"], "decimal");

        let restored: AnswerValue = serde_json::from_value(integer).unwrap();
        assert_eq!(restored, AnswerValue::Integer(4));
    }
}

pub(crate) mod attempts;
pub(crate) mod enrollments;
pub(crate) mod exams;
pub(crate) mod proctoring_logs;
pub(crate) mod questions;

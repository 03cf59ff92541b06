pub(crate) mod attempts;
pub(crate) mod evaluator;
pub(crate) mod exam_access;
pub(crate) mod proctoring;
pub(crate) mod ranking;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::services::proctoring::{
    DevicePresence, ProctoringStatus, SessionSnapshot, SessionSummary, ViolationKind,
    ViolationOutcome, ViolationRecord,
};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SessionStart {
    #[serde(default)]
    pub(crate) webcam: bool,
    #[serde(default)]
    pub(crate) microphone: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ViolationReport {
    pub(crate) kind: ViolationKind,
    #[serde(default)]
    #[validate(length(max = 500, message = "details must be at most 500 characters"))]
    pub(crate) details: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct InactivityCheck {
    #[serde(default)]
    #[serde(alias = "maxIdleSeconds")]
    #[validate(range(min = 1, max = 86400, message = "max_idle_seconds must be between 1 and 86400"))]
    pub(crate) max_idle_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SessionListQuery {
    #[serde(default)]
    pub(crate) status: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationResponse {
    pub(crate) kind: ViolationKind,
    pub(crate) occurred_at: String,
    pub(crate) severity: u32,
    pub(crate) details: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) exam_id: String,
    pub(crate) user_id: String,
    pub(crate) status: ProctoringStatus,
    pub(crate) suspicion_score: u32,
    pub(crate) started_at: String,
    pub(crate) last_activity_at: String,
    pub(crate) idle_seconds: i64,
    pub(crate) violation_count: usize,
    pub(crate) violations: Vec<ViolationResponse>,
    pub(crate) devices: DevicePresence,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionStartResponse {
    pub(crate) created: bool,
    pub(crate) session: SessionResponse,
}

/// `session` is `null` when no live session exists for the caller.
#[derive(Debug, Serialize)]
pub(crate) struct SessionStatusResponse {
    pub(crate) session: Option<SessionResponse>,
}

/// Proctoring events never fail the client. `recorded` is false when the
/// session is unknown or the event was rate limited.
#[derive(Debug, Serialize)]
pub(crate) struct ViolationRecordedResponse {
    pub(crate) recorded: bool,
    pub(crate) violation: Option<ViolationResponse>,
    pub(crate) suspicion_score: Option<u32>,
    pub(crate) status: Option<ProctoringStatus>,
    pub(crate) newly_flagged: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionSummaryResponse {
    pub(crate) exam_id: String,
    pub(crate) user_id: String,
    pub(crate) started_at: String,
    pub(crate) ended_at: String,
    pub(crate) duration_seconds: i64,
    pub(crate) final_score: u32,
    pub(crate) final_status: ProctoringStatus,
    pub(crate) violations: Vec<ViolationResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionEndResponse {
    pub(crate) ended: bool,
    pub(crate) summary: Option<SessionSummaryResponse>,
}

impl From<&ViolationRecord> for ViolationResponse {
    fn from(record: &ViolationRecord) -> Self {
        Self {
            kind: record.kind,
            occurred_at: format_offset(record.occurred_at),
            severity: record.severity,
            details: record.details.clone(),
        }
    }
}

impl From<SessionSnapshot> for SessionResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            exam_id: snapshot.key.exam_id,
            user_id: snapshot.key.user_id,
            status: snapshot.status,
            suspicion_score: snapshot.suspicion_score,
            started_at: format_offset(snapshot.started_at),
            last_activity_at: format_offset(snapshot.last_activity_at),
            idle_seconds: snapshot.idle_seconds,
            violation_count: snapshot.violation_count,
            violations: snapshot.violations.iter().map(ViolationResponse::from).collect(),
            devices: snapshot.devices,
        }
    }
}

impl From<&SessionSummary> for SessionSummaryResponse {
    fn from(summary: &SessionSummary) -> Self {
        Self {
            exam_id: summary.key.exam_id.clone(),
            user_id: summary.key.user_id.clone(),
            started_at: format_offset(summary.started_at),
            ended_at: format_offset(summary.ended_at),
            duration_seconds: summary.duration_seconds,
            final_score: summary.final_score,
            final_status: summary.final_status,
            violations: summary.violations.iter().map(ViolationResponse::from).collect(),
        }
    }
}

impl ViolationRecordedResponse {
    pub(crate) fn skipped() -> Self {
        Self {
            recorded: false,
            violation: None,
            suspicion_score: None,
            status: None,
            newly_flagged: false,
        }
    }
}

impl From<ViolationOutcome> for ViolationRecordedResponse {
    fn from(outcome: ViolationOutcome) -> Self {
        Self {
            recorded: true,
            violation: Some(ViolationResponse::from(&outcome.violation)),
            suspicion_score: Some(outcome.suspicion_score),
            status: Some(outcome.status),
            newly_flagged: outcome.newly_flagged,
        }
    }
}

impl From<SessionStart> for DevicePresence {
    fn from(payload: SessionStart) -> Self {
        DevicePresence { webcam: payload.webcam, microphone: payload.microphone }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn violation_report_parses_kind_and_bounds_details() {
        let report: ViolationReport =
            serde_json::from_value(json!({"kind": "device_lost", "details": "webcam"})).unwrap();
        assert_eq!(report.kind, ViolationKind::DeviceLost);
        assert!(report.validate().is_ok());

        let long = ViolationReport { kind: ViolationKind::TabSwitch, details: Some("x".repeat(501)) };
        assert!(long.validate().is_err());

        assert!(serde_json::from_value::<ViolationReport>(json!({"kind": "screenshot"})).is_err());
    }

    #[test]
    fn inactivity_check_defaults_to_configured_threshold() {
        let check: InactivityCheck = serde_json::from_value(json!({})).unwrap();
        assert!(check.max_idle_seconds.is_none());
        assert!(InactivityCheck { max_idle_seconds: Some(0) }.validate().is_err());
    }

    #[test]
    fn skipped_violation_serializes_as_not_recorded() {
        let json = serde_json::to_value(ViolationRecordedResponse::skipped()).unwrap();
        assert_eq!(json["recorded"], false);
        assert!(json["violation"].is_null());
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::config::ProctoringSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ViolationKind {
    TabSwitch,
    FullscreenExit,
    Inactivity,
    /// Webcam or microphone observed at setup is no longer reported.
    DeviceLost,
}

impl ViolationKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::Inactivity => "inactivity",
            ViolationKind::DeviceLost => "device_lost",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status in promotion order. `Ended` is only ever set by the tracker
/// when a session leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ProctoringStatus {
    Active,
    Suspicious,
    Flagged,
    Ended,
}

impl ProctoringStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ProctoringStatus::Active => "active",
            ProctoringStatus::Suspicious => "suspicious",
            ProctoringStatus::Flagged => "flagged",
            ProctoringStatus::Ended => "ended",
        }
    }
}

impl FromStr for ProctoringStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(ProctoringStatus::Active),
            "suspicious" => Ok(ProctoringStatus::Suspicious),
            "flagged" => Ok(ProctoringStatus::Flagged),
            "ended" => Ok(ProctoringStatus::Ended),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ViolationRecord {
    pub(crate) kind: ViolationKind,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) occurred_at: OffsetDateTime,
    pub(crate) severity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) details: Option<String>,
}

/// Severity weights and the thresholds that turn an accumulated score into a
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViolationPolicy {
    pub(crate) tab_switch: u32,
    pub(crate) fullscreen_exit: u32,
    pub(crate) inactivity: u32,
    pub(crate) device_lost: u32,
    pub(crate) suspicious_threshold: u32,
    pub(crate) flagged_threshold: u32,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self {
            tab_switch: 10,
            fullscreen_exit: 15,
            inactivity: 5,
            device_lost: 20,
            suspicious_threshold: 30,
            flagged_threshold: 60,
        }
    }
}

impl ViolationPolicy {
    pub(crate) fn from_settings(settings: &ProctoringSettings) -> Self {
        Self {
            tab_switch: settings.weight_tab_switch,
            fullscreen_exit: settings.weight_fullscreen_exit,
            inactivity: settings.weight_inactivity,
            device_lost: settings.weight_device_lost,
            suspicious_threshold: settings.suspicious_threshold,
            flagged_threshold: settings.flagged_threshold,
        }
    }

    pub(crate) fn weight(&self, kind: ViolationKind) -> u32 {
        match kind {
            ViolationKind::TabSwitch => self.tab_switch,
            ViolationKind::FullscreenExit => self.fullscreen_exit,
            ViolationKind::Inactivity => self.inactivity,
            ViolationKind::DeviceLost => self.device_lost,
        }
    }

    pub(crate) fn classify(
        &self,
        kind: ViolationKind,
        occurred_at: OffsetDateTime,
        details: Option<String>,
    ) -> ViolationRecord {
        ViolationRecord { kind, occurred_at, severity: self.weight(kind), details }
    }

    pub(crate) fn status_for(&self, score: u32) -> ProctoringStatus {
        if score >= self.flagged_threshold {
            ProctoringStatus::Flagged
        } else if score >= self.suspicious_threshold {
            ProctoringStatus::Suspicious
        } else {
            ProctoringStatus::Active
        }
    }

    /// The status a live session moves to after reaching `score`. Never lower
    /// than `current`.
    pub(crate) fn promote(&self, current: ProctoringStatus, score: u32) -> ProctoringStatus {
        current.max(self.status_for(score))
    }
}

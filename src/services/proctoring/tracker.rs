//! Process-local registry of live proctoring sessions.
//!
//! Sessions are keyed by (exam, user) and each one sits behind its own mutex,
//! so events for different students never contend. Nothing here is durable: a
//! restart loses every live session. Summaries are handed back to the caller
//! when a session leaves the registry so they can be written to the audit log.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::core::config::ProctoringSettings;
use crate::services::proctoring::classifier::{
    ProctoringStatus, ViolationKind, ViolationPolicy, ViolationRecord,
};

pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    pub(crate) exam_id: String,
    pub(crate) user_id: String,
}

impl SessionKey {
    pub(crate) fn new(exam_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { exam_id: exam_id.into(), user_id: user_id.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct DevicePresence {
    pub(crate) webcam: bool,
    pub(crate) microphone: bool,
}

#[derive(Debug)]
struct ProctoringSession {
    started_at: OffsetDateTime,
    last_activity_at: OffsetDateTime,
    status: ProctoringStatus,
    suspicion_score: u32,
    violations: Vec<ViolationRecord>,
    devices: DevicePresence,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionSnapshot {
    pub(crate) key: SessionKey,
    pub(crate) started_at: OffsetDateTime,
    pub(crate) last_activity_at: OffsetDateTime,
    pub(crate) status: ProctoringStatus,
    pub(crate) suspicion_score: u32,
    pub(crate) violation_count: usize,
    pub(crate) violations: Vec<ViolationRecord>,
    pub(crate) devices: DevicePresence,
    pub(crate) idle_seconds: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ViolationOutcome {
    pub(crate) violation: ViolationRecord,
    pub(crate) suspicion_score: u32,
    pub(crate) status: ProctoringStatus,
    pub(crate) newly_flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndReason {
    Ended,
    IdleTimeout,
    Shutdown,
}

impl EndReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EndReason::Ended => "ended",
            EndReason::IdleTimeout => "idle_timeout",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// What is left of a session once it leaves the registry. `final_status` is
/// the status it held while live.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionSummary {
    pub(crate) key: SessionKey,
    pub(crate) started_at: OffsetDateTime,
    pub(crate) ended_at: OffsetDateTime,
    pub(crate) duration_seconds: i64,
    pub(crate) final_score: u32,
    pub(crate) final_status: ProctoringStatus,
    pub(crate) violations: Vec<ViolationRecord>,
    pub(crate) end_reason: EndReason,
}

type SharedSession = Arc<Mutex<ProctoringSession>>;

#[derive(Clone)]
pub(crate) struct ProctoringTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    sessions: DashMap<SessionKey, SharedSession>,
    policy: ViolationPolicy,
    clock: Arc<dyn Clock>,
}

impl ProctoringTracker {
    pub(crate) fn new(policy: ViolationPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { inner: Arc::new(TrackerInner { sessions: DashMap::new(), policy, clock }) }
    }

    pub(crate) fn from_settings(settings: &ProctoringSettings) -> Self {
        Self::new(ViolationPolicy::from_settings(settings), Arc::new(SystemClock))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Opens a session for `key`. An existing session is left untouched and
    /// returned with `created == false`.
    pub(crate) fn start_session(
        &self,
        key: SessionKey,
        devices: DevicePresence,
    ) -> (SessionSnapshot, bool) {
        let now = self.now();
        let (session, created) = match self.inner.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let session = Arc::new(Mutex::new(ProctoringSession {
                    started_at: now,
                    last_activity_at: now,
                    status: ProctoringStatus::Active,
                    suspicion_score: 0,
                    violations: Vec::new(),
                    devices,
                }));
                entry.insert(Arc::clone(&session));
                (session, true)
            }
        };

        if created {
            self.record_live_gauge();
            tracing::info!(
                exam_id = %key.exam_id,
                user_id = %key.user_id,
                webcam = devices.webcam,
                microphone = devices.microphone,
                "Proctoring session started"
            );
        }

        let snapshot = snapshot(&key, &lock(&session), now);
        (snapshot, created)
    }

    pub(crate) fn update_activity(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let session = self.session(key)?;
        let now = self.now();
        let mut guard = lock(&session);
        guard.last_activity_at = guard.last_activity_at.max(now);
        Some(snapshot(key, &guard, now))
    }

    pub(crate) fn record_tab_switch(&self, key: &SessionKey) -> Option<ViolationOutcome> {
        self.record_violation(key, ViolationKind::TabSwitch, None)
    }

    pub(crate) fn record_fullscreen_exit(&self, key: &SessionKey) -> Option<ViolationOutcome> {
        self.record_violation(key, ViolationKind::FullscreenExit, None)
    }

    /// Appends a weighted violation and re-evaluates the status. Unknown
    /// sessions are a no-op.
    pub(crate) fn record_violation(
        &self,
        key: &SessionKey,
        kind: ViolationKind,
        details: Option<String>,
    ) -> Option<ViolationOutcome> {
        let session = self.session(key)?;
        let now = self.now();
        let mut guard = lock(&session);
        if guard.status == ProctoringStatus::Ended {
            return None;
        }
        Some(self.apply_violation(key, &mut guard, kind, details, now))
    }

    /// Synthesizes one inactivity violation when the session has been idle for
    /// strictly longer than `max_idle`. The heartbeat is left as is, so every
    /// call past the threshold yields exactly one violation.
    pub(crate) fn check_inactivity(
        &self,
        key: &SessionKey,
        max_idle: Duration,
    ) -> Option<ViolationOutcome> {
        let session = self.session(key)?;
        let now = self.now();
        let mut guard = lock(&session);
        if guard.status == ProctoringStatus::Ended {
            return None;
        }

        let idle = now - guard.last_activity_at;
        if idle <= max_idle {
            return None;
        }

        let details = format!("idle for {}s", idle.whole_seconds());
        Some(self.apply_violation(key, &mut guard, ViolationKind::Inactivity, Some(details), now))
    }

    pub(crate) fn session_status(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let session = self.session(key)?;
        let now = self.now();
        let guard = lock(&session);
        Some(snapshot(key, &guard, now))
    }

    /// Live sessions, optionally filtered by status, highest score first.
    pub(crate) fn list_sessions(&self, status: Option<ProctoringStatus>) -> Vec<SessionSnapshot> {
        let now = self.now();
        let mut snapshots: Vec<SessionSnapshot> = self
            .entries()
            .into_iter()
            .map(|(key, session)| snapshot(&key, &lock(&session), now))
            .filter(|snapshot| status.map_or(true, |wanted| snapshot.status == wanted))
            .collect();

        snapshots.sort_by(|left, right| {
            right
                .suspicion_score
                .cmp(&left.suspicion_score)
                .then_with(|| left.key.exam_id.cmp(&right.key.exam_id))
                .then_with(|| left.key.user_id.cmp(&right.key.user_id))
        });
        snapshots
    }

    /// Removes the session and returns its summary. Ending an unknown or
    /// already ended session returns `None`.
    pub(crate) fn end_session(&self, key: &SessionKey) -> Option<SessionSummary> {
        let (key, session) = self.inner.sessions.remove(key)?;
        self.record_live_gauge();
        let summary = finish(key, &session, self.now(), EndReason::Ended);
        tracing::info!(
            exam_id = %summary.key.exam_id,
            user_id = %summary.key.user_id,
            final_score = summary.final_score,
            final_status = summary.final_status.as_str(),
            violations = summary.violations.len(),
            "Proctoring session ended"
        );
        Some(summary)
    }

    /// Removes every session whose last activity is older than `max_age`.
    ///
    /// The registry is snapshotted first and each candidate is locked on its
    /// own; a session that saw activity between the snapshot and removal is
    /// kept.
    pub(crate) fn cleanup_old_sessions(&self, max_age: Duration) -> Vec<SessionSummary> {
        let now = self.now();
        let is_stale = |session: &ProctoringSession| now - session.last_activity_at > max_age;

        let mut swept = Vec::new();
        for (key, session) in self.entries() {
            if !is_stale(&*lock(&session)) {
                continue;
            }

            let removed = self.inner.sessions.remove_if(&key, |_, current| {
                Arc::ptr_eq(current, &session) && is_stale(&*lock(current))
            });
            if let Some((key, session)) = removed {
                swept.push(finish(key, &session, now, EndReason::IdleTimeout));
            }
        }

        if !swept.is_empty() {
            metrics::counter!("proctoring_sessions_swept_total").increment(swept.len() as u64);
            self.record_live_gauge();
            tracing::info!(swept = swept.len(), "Idle proctoring sessions removed");
        }
        swept
    }

    /// Empties the registry, returning a summary for every session.
    pub(crate) fn drain(&self) -> Vec<SessionSummary> {
        let now = self.now();
        let mut drained = Vec::new();
        for (key, _) in self.entries() {
            if let Some((key, session)) = self.inner.sessions.remove(&key) {
                drained.push(finish(key, &session, now, EndReason::Shutdown));
            }
        }
        self.record_live_gauge();
        drained
    }

    fn apply_violation(
        &self,
        key: &SessionKey,
        session: &mut ProctoringSession,
        kind: ViolationKind,
        details: Option<String>,
        now: OffsetDateTime,
    ) -> ViolationOutcome {
        let policy = &self.inner.policy;
        let violation = policy.classify(kind, now, details);
        let previous = session.status;

        session.suspicion_score = session.suspicion_score.saturating_add(violation.severity);
        session.status = policy.promote(previous, session.suspicion_score);
        session.violations.push(violation.clone());

        let newly_flagged =
            previous != ProctoringStatus::Flagged && session.status == ProctoringStatus::Flagged;

        metrics::counter!("proctoring_violations_total", "kind" => kind.as_str()).increment(1);
        if newly_flagged {
            metrics::counter!("proctoring_sessions_flagged_total").increment(1);
            tracing::warn!(
                exam_id = %key.exam_id,
                user_id = %key.user_id,
                suspicion_score = session.suspicion_score,
                "Proctoring session flagged for review"
            );
        } else {
            tracing::debug!(
                exam_id = %key.exam_id,
                user_id = %key.user_id,
                kind = kind.as_str(),
                suspicion_score = session.suspicion_score,
                status = session.status.as_str(),
                "Proctoring violation recorded"
            );
        }

        ViolationOutcome {
            violation,
            suspicion_score: session.suspicion_score,
            status: session.status,
            newly_flagged,
        }
    }

    fn session(&self, key: &SessionKey) -> Option<SharedSession> {
        self.inner.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn entries(&self) -> Vec<(SessionKey, SharedSession)> {
        self.inner
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn now(&self) -> OffsetDateTime {
        self.inner.clock.now()
    }

    fn record_live_gauge(&self) {
        metrics::gauge!("proctoring_sessions_live").set(self.inner.sessions.len() as f64);
    }
}

fn lock(session: &Mutex<ProctoringSession>) -> MutexGuard<'_, ProctoringSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn snapshot(key: &SessionKey, session: &ProctoringSession, now: OffsetDateTime) -> SessionSnapshot {
    SessionSnapshot {
        key: key.clone(),
        started_at: session.started_at,
        last_activity_at: session.last_activity_at,
        status: session.status,
        suspicion_score: session.suspicion_score,
        violation_count: session.violations.len(),
        violations: session.violations.clone(),
        devices: session.devices,
        idle_seconds: (now - session.last_activity_at).whole_seconds().max(0),
    }
}

fn finish(
    key: SessionKey,
    session: &Mutex<ProctoringSession>,
    now: OffsetDateTime,
    end_reason: EndReason,
) -> SessionSummary {
    let mut guard = lock(session);
    let final_status = guard.status;
    guard.status = ProctoringStatus::Ended;

    SessionSummary {
        key,
        started_at: guard.started_at,
        ended_at: now,
        duration_seconds: (now - guard.started_at).whole_seconds().max(0),
        final_score: guard.suspicion_score,
        final_status,
        violations: std::mem::take(&mut guard.violations),
        end_reason,
    }
}

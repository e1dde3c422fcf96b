use chrono::{DateTime, Utc};
use serde::Serialize;

use proctor_core::integrity::IntegrityView;
use proctor_core::model::{
    DetectionResult, MonitorStatus, QuestionId, QuizId, SessionId, ViolationEvent, ViolationKind,
};
use proctor_core::progression::{ProgressionState, SubmitReason};

//
// ─── EVENTS ────────────────────────────────────────────────────────────────────
//

/// A violation as shown to the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationNotice {
    pub kind: ViolationKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ViolationEvent> for ViolationNotice {
    fn from(event: &ViolationEvent) -> Self {
        Self {
            kind: event.kind,
            detail: event.detail(),
            timestamp: event.occurred_at,
        }
    }
}

/// Position, timers and strike count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub index: usize,
    pub total: usize,
    pub time_remaining: u32,
    pub deadline_remaining: Option<u32>,
    pub answered: usize,
    pub strike_count: u32,
    pub strike_limit: u32,
    pub state: ProgressionState,
}

/// Everything a session publishes to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    Violation(ViolationNotice),
    Progress(ProgressView),
    Integrity(IntegrityView),
    /// Detection models are loaded; perceptual violations are derived from now on.
    DetectorReady,
    /// The strike limit was reached; submission follows immediately.
    ForceSubmit,
    Submitted {
        reason: SubmitReason,
        score: Option<u32>,
    },
    /// Delivery failed. Answers are kept and `retry_submission` may be called.
    SubmissionFailed { message: String },
}

//
// ─── QUERY VIEW ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionStatus {
    NotSubmitted,
    Accepted { score: Option<u32> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<String>,
    pub selected: Option<String>,
    pub bookmarked: bool,
}

/// Full read model of a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub quiz_id: QuizId,
    pub progress: ProgressView,
    pub question: Option<QuestionView>,
    pub integrity: IntegrityView,
    pub detection: DetectionResult,
    pub monitor: MonitorStatus,
    pub submission: SubmissionStatus,
}

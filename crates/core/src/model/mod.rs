mod answer;
mod detection;
mod ids;
mod question;
mod snapshot;
mod violation;

pub use answer::{AnswerSheet, SubmittedAnswer};
pub use detection::{
    DetectedObject, DetectionResult, FaceBox, MonitorStatus, PerceptionUpdate, RawBox,
    RawFaceDetection, RawPrediction,
};
pub use ids::{ParseIdError, QuestionId, QuizId, SessionId};
pub use question::{Question, QuestionError};
pub use snapshot::{PersistedSnapshot, SnapshotError};
pub use violation::{
    UnknownViolationKind, ViolationEvent, ViolationKind, ViolationPayload, ViolationSource,
};

//! Ports to the external capabilities a session consumes.
//!
//! Camera, face locator, object classifier, question source, submission sink and
//! the display (fullscreen) controller are provided by the embedding
//! application. Their payloads are normalized at this boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::model::{
    Question, QuizId, RawFaceDetection, RawPrediction, SessionId, SubmittedAnswer,
};
use proctor_core::progression::SubmitReason;

use crate::error::{CapabilityError, DisplayError, QuestionSourceError, SubmissionError};

//
// ─── CAPTURE ───────────────────────────────────────────────────────────────────
//

/// Requested camera stream shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub front_facing: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            front_facing: true,
        }
    }
}

/// Opaque handle to an open capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(u64);

impl CaptureHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open the camera.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::Unavailable` if the device cannot be opened.
    async fn open(&self, constraints: CaptureConstraints)
    -> Result<CaptureHandle, CapabilityError>;

    /// Latest frame of the stream, or `None` if none is available yet.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::Failed` if the frame cannot be read.
    async fn frame(&self, handle: CaptureHandle) -> Result<Option<Frame>, CapabilityError>;

    /// Release the stream. Closing twice is a no-op.
    async fn close(&self, handle: CaptureHandle);
}

//
// ─── PERCEPTION ────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait FaceLocator: Send + Sync {
    /// Load the model.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::Unavailable` if the model cannot be loaded.
    async fn warm_up(&self) -> Result<(), CapabilityError>;

    /// # Errors
    ///
    /// Returns `CapabilityError::Failed` if this frame cannot be processed.
    async fn locate(&self, frame: &Frame) -> Result<Vec<RawFaceDetection>, CapabilityError>;
}

#[async_trait]
pub trait ObjectClassifier: Send + Sync {
    /// Load the model.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::Unavailable` if the model cannot be loaded.
    async fn warm_up(&self) -> Result<(), CapabilityError>;

    /// # Errors
    ///
    /// Returns `CapabilityError::Failed` if this frame cannot be processed.
    async fn classify(&self, frame: &Frame) -> Result<Vec<RawPrediction>, CapabilityError>;
}

//
// ─── QUIZ IN / ANSWERS OUT ─────────────────────────────────────────────────────
//

/// Question set of one quiz in server-assigned order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedQuiz {
    pub quiz_id: QuizId,
    pub questions: Vec<Question>,
    pub time_budget_secs: Option<u32>,
}

#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `QuestionSourceError` if the quiz is unknown or cannot be loaded.
    async fn fetch(&self, quiz_id: QuizId) -> Result<FetchedQuiz, QuestionSourceError>;
}

/// Final answers handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub session_id: SessionId,
    pub quiz_id: QuizId,
    pub answers: Vec<SubmittedAnswer>,
    pub reason: SubmitReason,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub score: Option<u32>,
}

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// # Errors
    ///
    /// Returns `SubmissionError` if the sink rejects or cannot store the answers.
    async fn submit(&self, request: &SubmissionRequest)
    -> Result<SubmissionReceipt, SubmissionError>;
}

//
// ─── DISPLAY ───────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait DisplayController: Send + Sync {
    async fn is_fullscreen(&self) -> bool;

    /// # Errors
    ///
    /// Returns `DisplayError::Rejected` if the platform refuses the request.
    async fn request_fullscreen(&self) -> Result<(), DisplayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capture_is_small_front_camera() {
        let constraints = CaptureConstraints::default();
        assert_eq!((constraints.width, constraints.height), (320, 240));
        assert!(constraints.front_facing);
    }
}

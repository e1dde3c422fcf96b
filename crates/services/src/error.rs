//! Shared error types for the services crate.

use thiserror::Error;

use proctor_core::model::{QuestionError, QuizId};
use proctor_core::progression::ProgressionError;
use storage::repository::StorageError;

/// A perception or capture capability failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CapabilityError {
    /// Setup failed; the session cannot use the capability.
    #[error("{capability} unavailable: {reason}")]
    Unavailable {
        capability: &'static str,
        reason: String,
    },
    /// A single call failed; the caller may try again on the next cycle.
    #[error("{capability} failed: {reason}")]
    Failed {
        capability: &'static str,
        reason: String,
    },
}

/// The platform refused a fullscreen request. Retried on the next poll.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisplayError {
    #[error("fullscreen request rejected: {0}")]
    Rejected(String),
}

/// Errors emitted by a `QuestionSource`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuestionSourceError {
    #[error("quiz {0} not found")]
    NotFound(QuizId),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by a `SubmissionSink`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("session was already submitted")]
    Duplicate,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Session or quiz identifier missing or unparsable at startup.
    #[error("malformed session: {0}")]
    MalformedSession(String),
    #[error("quiz has no questions")]
    EmptyQuiz,
    #[error("session actor has stopped")]
    Closed,
    #[error("no failed submission to retry")]
    NoPendingSubmission,
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Source(#[from] QuestionSourceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Progression(#[from] ProgressionError),
}

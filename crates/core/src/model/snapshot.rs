use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;
use crate::progression::SubmitReason;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encoding(String),

    #[error("snapshot carries no question order")]
    MissingOrder,

    #[error("snapshot question order does not match the loaded question set")]
    OrderMismatch,

    #[error("snapshot index {index} is out of range for {total} questions")]
    IndexOutOfRange { index: usize, total: usize },
}

/// Durable copy of progression state, overwritten on every save.
///
/// The JSON layout is `{answers, currentIndex, timeRemaining, ...}` with answers
/// keyed by question position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub answers: BTreeMap<usize, Option<String>>,
    pub current_index: usize,
    pub time_remaining: u32,
    #[serde(default)]
    pub question_order: Vec<QuestionId>,
    #[serde(default)]
    pub bookmarked: BTreeSet<usize>,
    #[serde(default)]
    pub visited: BTreeSet<usize>,
    #[serde(default)]
    pub deadline_remaining: Option<u32>,
    /// Set once the session is submitted. A resumed session stays submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted: Option<SubmitReason>,
}

impl PersistedSnapshot {
    /// # Errors
    ///
    /// Returns `SnapshotError::Encoding` if serialization fails.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| SnapshotError::Encoding(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `SnapshotError::Encoding` if the payload is not a valid snapshot.
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(raw).map_err(|e| SnapshotError::Encoding(e.to_string()))
    }

    /// Checks the snapshot can resume a session over `questions`.
    ///
    /// The recorded order must be a permutation of the loaded question ids and the
    /// index must point at an existing position. Answers are keyed by position in
    /// that order, so a snapshot without one cannot be resumed.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::MissingOrder`, `SnapshotError::OrderMismatch` or
    /// `SnapshotError::IndexOutOfRange`.
    pub fn validate_against(&self, questions: &[QuestionId]) -> Result<(), SnapshotError> {
        if self.question_order.is_empty() {
            return Err(SnapshotError::MissingOrder);
        }
        if self.question_order.len() != questions.len() {
            return Err(SnapshotError::OrderMismatch);
        }
        let loaded: HashSet<_> = questions.iter().collect();
        let recorded: HashSet<_> = self.question_order.iter().collect();
        if loaded != recorded || recorded.len() != self.question_order.len() {
            return Err(SnapshotError::OrderMismatch);
        }
        if self.current_index >= questions.len() {
            return Err(SnapshotError::IndexOutOfRange {
                index: self.current_index,
                total: questions.len(),
            });
        }
        Ok(())
    }
}

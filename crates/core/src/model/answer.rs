use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::ids::QuestionId;
use crate::model::question::Question;

/// Per-question answers for one session, keyed by position in the shuffled order.
///
/// Holds exactly one entry per question. `None` means "not answered"; once the
/// question's timer has expired it means "timed out unanswered".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSheet {
    entries: BTreeMap<usize, Option<String>>,
}

impl AnswerSheet {
    /// Creates a sheet with `len` unanswered entries.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            entries: (0..len).map(|i| (i, None)).collect(),
        }
    }

    /// Rebuilds a sheet from persisted entries, filling gaps and dropping
    /// positions that no longer exist.
    #[must_use]
    pub fn from_persisted(len: usize, persisted: &BTreeMap<usize, Option<String>>) -> Self {
        let mut sheet = Self::new(len);
        for (index, value) in persisted {
            if let Some(slot) = sheet.entries.get_mut(index) {
                slot.clone_from(value);
            }
        }
        sheet
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(&index).and_then(|v| v.as_deref())
    }

    #[must_use]
    pub fn is_answered(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.entries.values().filter(|v| v.is_some()).count()
    }

    /// Sets the answer at `index`. Returns `false` if the position does not exist.
    pub(crate) fn set(&mut self, index: usize, value: Option<String>) -> bool {
        match self.entries.get_mut(&index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&str>)> {
        self.entries.iter().map(|(i, v)| (*i, v.as_deref()))
    }

    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<usize, Option<String>> {
        &self.entries
    }

    /// Pairs each answer with its question id, in presentation order.
    #[must_use]
    pub fn to_submission(&self, questions: &[Question]) -> Vec<SubmittedAnswer> {
        questions
            .iter()
            .enumerate()
            .map(|(index, question)| SubmittedAnswer {
                question_id: question.id(),
                selected: self.get(index).map(str::to_owned),
            })
            .collect()
    }
}

/// One answer as handed to the submission sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    pub selected: Option<String>,
}

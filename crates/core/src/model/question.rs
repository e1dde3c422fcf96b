use std::collections::HashSet;

use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question prompt cannot be empty")]
    EmptyPrompt,

    #[error("question must offer at least one option")]
    NoOptions,

    #[error("option {index} is empty")]
    EmptyOption { index: usize },

    #[error("option text must be unique: {text:?}")]
    DuplicateOption { text: String },

    #[error("question duration must be > 0 seconds")]
    InvalidDuration,
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A single-choice question as delivered by the question source.
///
/// Immutable once loaded: the progression machine only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    prompt: String,
    options: Vec<String>,
    points: u32,
    duration_secs: Option<u32>,
}

impl Question {
    /// Builds a validated question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt or any option is blank, if two options
    /// share the same text, or if an explicit duration of zero is given.
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        options: Vec<String>,
        points: u32,
        duration_secs: Option<u32>,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        if options.is_empty() {
            return Err(QuestionError::NoOptions);
        }

        let mut seen = HashSet::with_capacity(options.len());
        for (index, option) in options.iter().enumerate() {
            if option.trim().is_empty() {
                return Err(QuestionError::EmptyOption { index });
            }
            if !seen.insert(option.as_str()) {
                return Err(QuestionError::DuplicateOption {
                    text: option.clone(),
                });
            }
        }

        if duration_secs == Some(0) {
            return Err(QuestionError::InvalidDuration);
        }

        Ok(Self {
            id,
            prompt,
            options,
            points,
            duration_secs,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    /// Per-question time limit, if the question overrides the session default.
    #[must_use]
    pub fn duration_secs(&self) -> Option<u32> {
        self.duration_secs
    }

    #[must_use]
    pub fn has_option(&self, text: &str) -> bool {
        self.options.iter().any(|o| o == text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn builds_valid_question() {
        let q = Question::new(
            QuestionId::new(1),
            "Why is HTTPS important?",
            options(&["Encrypts data in transit", "Improves SEO only"]),
            1,
            Some(90),
        )
        .unwrap();

        assert_eq!(q.options().len(), 2);
        assert!(q.has_option("Improves SEO only"));
        assert!(!q.has_option("Caches client inputs"));
        assert_eq!(q.duration_secs(), Some(90));
    }

    #[test]
    fn rejects_duplicate_options() {
        let err = Question::new(
            QuestionId::new(1),
            "Q",
            options(&["A", "B", "A"]),
            1,
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            QuestionError::DuplicateOption {
                text: "A".to_string()
            }
        );
    }

    #[test]
    fn rejects_blank_prompt_and_zero_duration() {
        assert_eq!(
            Question::new(QuestionId::new(1), "  ", options(&["A"]), 1, None).unwrap_err(),
            QuestionError::EmptyPrompt
        );
        assert_eq!(
            Question::new(QuestionId::new(1), "Q", options(&["A"]), 1, Some(0)).unwrap_err(),
            QuestionError::InvalidDuration
        );
        assert_eq!(
            Question::new(QuestionId::new(1), "Q", Vec::new(), 1, None).unwrap_err(),
            QuestionError::NoOptions
        );
    }
}

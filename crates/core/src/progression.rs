//! Forward-only, timer-driven question progression.
//!
//! ```text
//! Loading ──start──▶ InProgress(i, t) ──next──▶ AwaitingConfirmation(i, t)
//!                        │   ▲                        │ confirm: i+1
//!                        │   └──────── cancel ────────┘
//!                        └─ t == 0: i+1, or Submitted on the last question
//! any non-terminal ──force_submit──▶ Submitted
//! ```
//!
//! The countdown keeps running while a confirmation is open; expiry closes it
//! and advances exactly as it would from `InProgress`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AnswerSheet, PersistedSnapshot, Question, QuestionId, SnapshotError, SubmittedAnswer,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("the session has not started")]
    NotStarted,

    #[error("the session has already started")]
    AlreadyStarted,

    #[error("the quiz has no questions")]
    EmptyQuiz,

    #[error("answers can only be selected while a question is in progress")]
    NotAcceptingAnswers,

    #[error("option {option:?} does not belong to the current question")]
    UnknownOption { option: String },

    #[error("no confirmation is pending")]
    NotAwaitingConfirmation,

    #[error("the session has already been submitted")]
    AlreadySubmitted,
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    /// The last question's timer expired.
    Timeout,
    Manual,
    /// The violation ledger sealed.
    ForceSubmit,
    /// The whole-quiz time budget ran out.
    DeadlineExpired,
}

impl SubmitReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitReason::Timeout => "timeout",
            SubmitReason::Manual => "manual",
            SubmitReason::ForceSubmit => "force_submit",
            SubmitReason::DeadlineExpired => "deadline_expired",
        }
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown submit reason: {0}")]
pub struct UnknownSubmitReason(pub String);

impl FromStr for SubmitReason {
    type Err = UnknownSubmitReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "timeout" => Ok(SubmitReason::Timeout),
            "manual" => Ok(SubmitReason::Manual),
            "force_submit" => Ok(SubmitReason::ForceSubmit),
            "deadline_expired" => Ok(SubmitReason::DeadlineExpired),
            other => Err(UnknownSubmitReason(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProgressionState {
    Loading,
    InProgress { index: usize, time_remaining: u32 },
    AwaitingConfirmation { index: usize, time_remaining: u32 },
    Submitted { reason: SubmitReason },
}

/// Observable consequences of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionEvent {
    AnswerRecorded { index: usize },
    /// The question expired without an answer and was recorded as `null`.
    TimedOut { index: usize },
    Advanced { from: usize, to: usize },
    ConfirmationRequested { index: usize },
    ConfirmationCancelled { index: usize },
    /// Confirm on the last question: nothing to advance to.
    LastQuestionReached { index: usize },
    BookmarkToggled { index: usize, bookmarked: bool },
    Submitted(SubmitReason),
}

/// How `start` treated the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Fresh,
    Resumed,
    /// The snapshot did not fit the loaded questions; the session started fresh.
    Discarded(SnapshotError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    Running,
    Awaiting,
    Submitted(SubmitReason),
}

//
// ─── MACHINE ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct ProgressionMachine {
    default_duration_secs: u32,
    deadline_budget_secs: Option<u32>,
    questions: Vec<Question>,
    answers: AnswerSheet,
    phase: Phase,
    index: usize,
    time_remaining: u32,
    deadline_remaining: Option<u32>,
    bookmarked: BTreeSet<usize>,
    visited: BTreeSet<usize>,
}

impl ProgressionMachine {
    /// `default_duration_secs` applies to questions without their own duration.
    #[must_use]
    pub fn new(default_duration_secs: u32) -> Self {
        Self {
            default_duration_secs: default_duration_secs.max(1),
            deadline_budget_secs: None,
            questions: Vec::new(),
            answers: AnswerSheet::new(0),
            phase: Phase::Loading,
            index: 0,
            time_remaining: 0,
            deadline_remaining: None,
            bookmarked: BTreeSet::new(),
            visited: BTreeSet::new(),
        }
    }

    /// Adds a whole-quiz time budget on top of the per-question timers.
    #[must_use]
    pub fn with_deadline(mut self, budget_secs: Option<u32>) -> Self {
        self.deadline_budget_secs = budget_secs.filter(|s| *s > 0);
        self
    }

    /// Leaves `Loading`. The question order is shuffled exactly once here, unless
    /// `snapshot` resumes a previous run of the same quiz, in which case its order,
    /// answers, position and timers are restored. A snapshot taken after
    /// submission resumes straight into `Submitted`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::AlreadyStarted` outside `Loading` and
    /// `ProgressionError::EmptyQuiz` for an empty question set.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        mut questions: Vec<Question>,
        rng: &mut R,
        snapshot: Option<PersistedSnapshot>,
    ) -> Result<Recovery, ProgressionError> {
        if self.phase != Phase::Loading {
            return Err(ProgressionError::AlreadyStarted);
        }
        if questions.is_empty() {
            return Err(ProgressionError::EmptyQuiz);
        }

        let recovery = match snapshot {
            None => Recovery::Fresh,
            Some(snapshot) => {
                let ids: Vec<QuestionId> = questions.iter().map(Question::id).collect();
                match snapshot.validate_against(&ids) {
                    Ok(()) => {
                        self.resume(questions, &snapshot);
                        return Ok(Recovery::Resumed);
                    }
                    Err(err) => Recovery::Discarded(err),
                }
            }
        };

        questions.shuffle(rng);
        self.answers = AnswerSheet::new(questions.len());
        self.questions = questions;
        self.index = 0;
        self.time_remaining = self.duration_of(0);
        self.deadline_remaining = self.deadline_budget_secs;
        self.visited.insert(0);
        self.phase = Phase::Running;
        Ok(recovery)
    }

    fn resume(&mut self, questions: Vec<Question>, snapshot: &PersistedSnapshot) {
        let mut by_id: HashMap<QuestionId, Question> =
            questions.into_iter().map(|q| (q.id(), q)).collect();
        self.questions = snapshot
            .question_order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();

        let len = self.questions.len();
        self.answers = AnswerSheet::from_persisted(len, &snapshot.answers);
        self.index = snapshot.current_index;
        // A snapshot taken at zero expires on the first tick.
        self.time_remaining = snapshot.time_remaining.max(1);
        self.deadline_remaining = snapshot
            .deadline_remaining
            .or(self.deadline_budget_secs)
            .map(|s| s.max(1));
        self.bookmarked = snapshot
            .bookmarked
            .iter()
            .copied()
            .filter(|i| *i < len)
            .collect();
        self.visited = snapshot
            .visited
            .iter()
            .copied()
            .filter(|i| *i <= self.index)
            .collect();
        self.visited.insert(self.index);
        self.phase = match snapshot.submitted {
            Some(reason) => Phase::Submitted(reason),
            None => Phase::Running,
        };
    }

    /// One countdown second. No-op outside `InProgress`/`AwaitingConfirmation`.
    pub fn tick(&mut self) -> Vec<ProgressionEvent> {
        if !matches!(self.phase, Phase::Running | Phase::Awaiting) {
            return Vec::new();
        }

        let deadline_hit = match self.deadline_remaining.as_mut() {
            Some(deadline) => {
                *deadline = deadline.saturating_sub(1);
                *deadline == 0
            }
            None => false,
        };
        self.time_remaining = self.time_remaining.saturating_sub(1);
        let expired = self.time_remaining == 0;

        let mut events = Vec::new();
        let index = self.index;
        if expired && !self.answers.is_answered(index) {
            self.answers.set(index, None);
            events.push(ProgressionEvent::TimedOut { index });
        }
        if deadline_hit {
            events.extend(self.finish(SubmitReason::DeadlineExpired));
            return events;
        }
        if !expired {
            return events;
        }
        if self.is_last(index) {
            events.extend(self.finish(SubmitReason::Timeout));
        } else {
            events.push(self.advance());
        }
        events
    }

    /// # Errors
    ///
    /// Fails unless a question is in progress, or if `option` is not one of its
    /// options.
    pub fn select_option(&mut self, option: &str) -> Result<ProgressionEvent, ProgressionError> {
        match self.phase {
            Phase::Running => {}
            Phase::Awaiting => return Err(ProgressionError::NotAcceptingAnswers),
            Phase::Loading => return Err(ProgressionError::NotStarted),
            Phase::Submitted(_) => return Err(ProgressionError::AlreadySubmitted),
        }
        let index = self.index;
        let known = self
            .questions
            .get(index)
            .is_some_and(|q| q.has_option(option));
        if !known {
            return Err(ProgressionError::UnknownOption {
                option: option.to_string(),
            });
        }
        self.answers.set(index, Some(option.to_string()));
        Ok(ProgressionEvent::AnswerRecorded { index })
    }

    /// Opens the "no going back" confirmation. Repeated requests are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotStarted` or `ProgressionError::AlreadySubmitted`.
    pub fn request_next(&mut self) -> Result<Option<ProgressionEvent>, ProgressionError> {
        match self.phase {
            Phase::Running => {
                self.phase = Phase::Awaiting;
                Ok(Some(ProgressionEvent::ConfirmationRequested { index: self.index }))
            }
            Phase::Awaiting => Ok(None),
            Phase::Loading => Err(ProgressionError::NotStarted),
            Phase::Submitted(_) => Err(ProgressionError::AlreadySubmitted),
        }
    }

    /// Advances by one and resets the timer. On the last question it only
    /// closes the confirmation.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotAwaitingConfirmation` unless a confirmation is
    /// open, or `ProgressionError::AlreadySubmitted`.
    pub fn confirm_next(&mut self) -> Result<ProgressionEvent, ProgressionError> {
        self.expect_awaiting()?;
        if self.is_last(self.index) {
            self.phase = Phase::Running;
            return Ok(ProgressionEvent::LastQuestionReached { index: self.index });
        }
        Ok(self.advance())
    }

    /// # Errors
    ///
    /// Returns `ProgressionError::NotAwaitingConfirmation` unless a confirmation is
    /// open, or `ProgressionError::AlreadySubmitted`.
    pub fn cancel_next(&mut self) -> Result<ProgressionEvent, ProgressionError> {
        self.expect_awaiting()?;
        self.phase = Phase::Running;
        Ok(ProgressionEvent::ConfirmationCancelled { index: self.index })
    }

    /// # Errors
    ///
    /// Fails unless a question is in progress.
    pub fn toggle_bookmark(&mut self) -> Result<ProgressionEvent, ProgressionError> {
        match self.phase {
            Phase::Running => {}
            Phase::Awaiting => return Err(ProgressionError::NotAcceptingAnswers),
            Phase::Loading => return Err(ProgressionError::NotStarted),
            Phase::Submitted(_) => return Err(ProgressionError::AlreadySubmitted),
        }
        let index = self.index;
        let bookmarked = if self.bookmarked.remove(&index) {
            false
        } else {
            self.bookmarked.insert(index);
            true
        };
        Ok(ProgressionEvent::BookmarkToggled { index, bookmarked })
    }

    /// Manual submission from `InProgress` or `AwaitingConfirmation`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotStarted` or `ProgressionError::AlreadySubmitted`.
    pub fn submit(&mut self) -> Result<ProgressionEvent, ProgressionError> {
        match self.phase {
            Phase::Loading => Err(ProgressionError::NotStarted),
            Phase::Submitted(_) => Err(ProgressionError::AlreadySubmitted),
            Phase::Running | Phase::Awaiting => {
                self.phase = Phase::Submitted(SubmitReason::Manual);
                Ok(ProgressionEvent::Submitted(SubmitReason::Manual))
            }
        }
    }

    /// Unconditional transition to `Submitted`, from any non-terminal state.
    /// Returns `None` if already submitted.
    pub fn force_submit(&mut self) -> Option<ProgressionEvent> {
        if self.is_submitted() {
            return None;
        }
        self.phase = Phase::Submitted(SubmitReason::ForceSubmit);
        Some(ProgressionEvent::Submitted(SubmitReason::ForceSubmit))
    }

    /// Persistable copy of the current progress. `None` before `start`.
    #[must_use]
    pub fn snapshot(&self) -> Option<PersistedSnapshot> {
        if self.phase == Phase::Loading {
            return None;
        }
        Some(PersistedSnapshot {
            answers: self.answers.as_map().clone(),
            current_index: self.index,
            time_remaining: self.time_remaining,
            question_order: self.questions.iter().map(Question::id).collect(),
            bookmarked: self.bookmarked.clone(),
            visited: self.visited.clone(),
            deadline_remaining: self.deadline_remaining,
            submitted: self.submit_reason(),
        })
    }

    #[must_use]
    pub fn state(&self) -> ProgressionState {
        match self.phase {
            Phase::Loading => ProgressionState::Loading,
            Phase::Running => ProgressionState::InProgress {
                index: self.index,
                time_remaining: self.time_remaining,
            },
            Phase::Awaiting => ProgressionState::AwaitingConfirmation {
                index: self.index,
                time_remaining: self.time_remaining,
            },
            Phase::Submitted(reason) => ProgressionState::Submitted { reason },
        }
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        matches!(self.phase, Phase::Submitted(_))
    }

    #[must_use]
    pub fn submit_reason(&self) -> Option<SubmitReason> {
        match self.phase {
            Phase::Submitted(reason) => Some(reason),
            _ => None,
        }
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    #[must_use]
    pub fn deadline_remaining(&self) -> Option<u32> {
        self.deadline_remaining
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        match self.phase {
            Phase::Loading => None,
            _ => self.questions.get(self.index),
        }
    }

    #[must_use]
    pub fn answers(&self) -> &AnswerSheet {
        &self.answers
    }

    #[must_use]
    pub fn bookmarked(&self) -> &BTreeSet<usize> {
        &self.bookmarked
    }

    #[must_use]
    pub fn visited(&self) -> &BTreeSet<usize> {
        &self.visited
    }

    /// Answers paired with question ids, ready for the submission sink.
    #[must_use]
    pub fn submission(&self) -> Vec<SubmittedAnswer> {
        self.answers.to_submission(&self.questions)
    }

    fn expect_awaiting(&self) -> Result<(), ProgressionError> {
        match self.phase {
            Phase::Awaiting => Ok(()),
            Phase::Submitted(_) => Err(ProgressionError::AlreadySubmitted),
            Phase::Loading => Err(ProgressionError::NotStarted),
            Phase::Running => Err(ProgressionError::NotAwaitingConfirmation),
        }
    }

    fn advance(&mut self) -> ProgressionEvent {
        let from = self.index;
        let to = from + 1;
        self.index = to;
        self.time_remaining = self.duration_of(to);
        self.visited.insert(to);
        self.phase = Phase::Running;
        ProgressionEvent::Advanced { from, to }
    }

    fn finish(&mut self, reason: SubmitReason) -> Vec<ProgressionEvent> {
        self.phase = Phase::Submitted(reason);
        vec![ProgressionEvent::Submitted(reason)]
    }

    fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.questions.len()
    }

    fn duration_of(&self, index: usize) -> u32 {
        self.questions
            .get(index)
            .and_then(Question::duration_secs)
            .unwrap_or(self.default_duration_secs)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::model::{
    PersistedSnapshot, Question, QuestionError, QuestionId, QuizId, SessionId, SubmittedAnswer,
    ViolationEvent,
};
use proctor_core::progression::SubmitReason;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Persisted shape for a quiz header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizRecord {
    pub id: QuizId,
    pub title: String,
    /// Whole-quiz time budget, on top of the per-question timers.
    pub time_budget_secs: Option<u32>,
}

/// Persisted shape for one question of a quiz, including its answer key.
///
/// `correct_option` stays in storage: `into_question` drops it so the answer key
/// never reaches the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub quiz_id: QuizId,
    pub question_id: QuestionId,
    pub position: u32,
    pub prompt: String,
    pub options: Vec<String>,
    pub points: u32,
    pub duration_secs: Option<u32>,
    pub correct_option: Option<String>,
}

impl QuestionRecord {
    #[must_use]
    pub fn from_question(
        quiz_id: QuizId,
        position: u32,
        question: &Question,
        correct_option: Option<String>,
    ) -> Self {
        Self {
            quiz_id,
            question_id: question.id(),
            position,
            prompt: question.prompt().to_owned(),
            options: question.options().to_vec(),
            points: question.points(),
            duration_secs: question.duration_secs(),
            correct_option,
        }
    }

    /// Convert the record back into a domain `Question`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the stored question fails validation.
    pub fn into_question(self) -> Result<Question, QuestionError> {
        Question::new(
            self.question_id,
            self.prompt,
            self.options,
            self.points,
            self.duration_secs,
        )
    }

    /// Points awarded for `selected`.
    #[must_use]
    pub fn award(&self, selected: Option<&str>) -> u32 {
        match (self.correct_option.as_deref(), selected) {
            (Some(correct), Some(selected)) if correct == selected => self.points,
            _ => 0,
        }
    }
}

/// One appended row of the violation audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationLogRecord {
    pub id: Option<i64>,
    pub session_id: SessionId,
    pub event: ViolationEvent,
}

/// Final answers of a session as accepted by the submission sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub session_id: SessionId,
    pub quiz_id: QuizId,
    pub answers: Vec<SubmittedAnswer>,
    pub reason: SubmitReason,
    pub score: Option<u32>,
    pub submitted_at: DateTime<Utc>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Autosave store: one overwritable snapshot per session.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Overwrite the session's snapshot. Last write wins.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_snapshot(
        &self,
        session_id: SessionId,
        snapshot: &PersistedSnapshot,
        saved_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Fetch the last snapshot, or `None` if the session never saved one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored payload is corrupt.
    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PersistedSnapshot>, StorageError>;

    /// Remove the snapshot once the session is submitted. Missing rows are fine.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn clear_snapshot(&self, session_id: SessionId) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ViolationLogRepository: Send + Sync {
    /// Append a violation to the audit log and return its row id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn append_violation(
        &self,
        session_id: SessionId,
        event: &ViolationEvent,
    ) -> Result<i64, StorageError>;

    /// All violations of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn violations_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ViolationLogRecord>, StorageError>;
}

#[async_trait]
pub trait QuestionBankRepository: Send + Sync {
    /// Insert or replace a quiz together with its full question list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a question belongs to another quiz.
    async fn upsert_quiz(
        &self,
        quiz: &QuizRecord,
        questions: &[QuestionRecord],
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_quiz(&self, id: QuizId) -> Result<Option<QuizRecord>, StorageError>;

    /// Questions of a quiz in server-assigned order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn questions_for_quiz(&self, id: QuizId) -> Result<Vec<QuestionRecord>, StorageError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Store the final answers of a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the session was already submitted.
    async fn record_submission(&self, submission: &SubmissionRecord) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn get_submission(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SubmissionRecord>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and the demo binary.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    snapshots: Arc<Mutex<HashMap<SessionId, PersistedSnapshot>>>,
    violations: Arc<Mutex<Vec<ViolationLogRecord>>>,
    quizzes: Arc<Mutex<HashMap<QuizId, (QuizRecord, Vec<QuestionRecord>)>>>,
    submissions: Arc<Mutex<HashMap<SessionId, SubmissionRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl SnapshotRepository for InMemoryRepository {
    async fn save_snapshot(
        &self,
        session_id: SessionId,
        snapshot: &PersistedSnapshot,
        _saved_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.snapshots.lock().map_err(poisoned)?;
        guard.insert(session_id, snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PersistedSnapshot>, StorageError> {
        let guard = self.snapshots.lock().map_err(poisoned)?;
        Ok(guard.get(&session_id).cloned())
    }

    async fn clear_snapshot(&self, session_id: SessionId) -> Result<(), StorageError> {
        let mut guard = self.snapshots.lock().map_err(poisoned)?;
        guard.remove(&session_id);
        Ok(())
    }
}

#[async_trait]
impl ViolationLogRepository for InMemoryRepository {
    async fn append_violation(
        &self,
        session_id: SessionId,
        event: &ViolationEvent,
    ) -> Result<i64, StorageError> {
        let mut guard = self.violations.lock().map_err(poisoned)?;
        let id = i64::try_from(guard.len() + 1)
            .map_err(|_| StorageError::Serialization("violation id overflow".into()))?;
        guard.push(ViolationLogRecord {
            id: Some(id),
            session_id,
            event: event.clone(),
        });
        Ok(id)
    }

    async fn violations_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ViolationLogRecord>, StorageError> {
        let guard = self.violations.lock().map_err(poisoned)?;
        Ok(guard
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QuestionBankRepository for InMemoryRepository {
    async fn upsert_quiz(
        &self,
        quiz: &QuizRecord,
        questions: &[QuestionRecord],
    ) -> Result<(), StorageError> {
        if questions.iter().any(|q| q.quiz_id != quiz.id) {
            return Err(StorageError::Conflict);
        }
        let mut ordered = questions.to_vec();
        ordered.sort_by_key(|q| q.position);

        let mut guard = self.quizzes.lock().map_err(poisoned)?;
        guard.insert(quiz.id, (quiz.clone(), ordered));
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<QuizRecord>, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        Ok(guard.get(&id).map(|(quiz, _)| quiz.clone()))
    }

    async fn questions_for_quiz(&self, id: QuizId) -> Result<Vec<QuestionRecord>, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        Ok(guard
            .get(&id)
            .map(|(_, questions)| questions.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryRepository {
    async fn record_submission(&self, submission: &SubmissionRecord) -> Result<(), StorageError> {
        let mut guard = self.submissions.lock().map_err(poisoned)?;
        if guard.contains_key(&submission.session_id) {
            return Err(StorageError::Conflict);
        }
        guard.insert(submission.session_id, submission.clone());
        Ok(())
    }

    async fn get_submission(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        let guard = self.submissions.lock().map_err(poisoned)?;
        Ok(guard.get(&session_id).cloned())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub violations: Arc<dyn ViolationLogRepository>,
    pub questions: Arc<dyn QuestionBankRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            snapshots: Arc::new(repo.clone()),
            violations: Arc::new(repo.clone()),
            questions: Arc::new(repo.clone()),
            submissions: Arc::new(repo),
        }
    }
}

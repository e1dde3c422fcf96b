//! Storage-backed implementations of the question source and submission sink.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use proctor_core::model::{Question, QuestionId, QuizId};
use storage::repository::{
    QuestionBankRepository, QuestionRecord, StorageError, SubmissionRecord, SubmissionRepository,
};

use crate::capabilities::{
    FetchedQuiz, QuestionSource, SubmissionReceipt, SubmissionRequest, SubmissionSink,
};
use crate::error::{QuestionSourceError, SubmissionError};

/// Serves quizzes from the question bank. The answer key stays behind.
#[derive(Clone)]
pub struct BankQuestionSource {
    bank: Arc<dyn QuestionBankRepository>,
}

impl BankQuestionSource {
    #[must_use]
    pub fn new(bank: Arc<dyn QuestionBankRepository>) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl QuestionSource for BankQuestionSource {
    async fn fetch(&self, quiz_id: QuizId) -> Result<FetchedQuiz, QuestionSourceError> {
        let quiz = self
            .bank
            .get_quiz(quiz_id)
            .await?
            .ok_or(QuestionSourceError::NotFound(quiz_id))?;
        let records = self.bank.questions_for_quiz(quiz_id).await?;

        let questions = records
            .into_iter()
            .map(QuestionRecord::into_question)
            .collect::<Result<Vec<Question>, _>>()?;

        Ok(FetchedQuiz {
            quiz_id,
            questions,
            time_budget_secs: quiz.time_budget_secs,
        })
    }
}

/// Scores answers against the bank's answer key and stores the submission.
#[derive(Clone)]
pub struct RecordedSubmissionSink {
    bank: Arc<dyn QuestionBankRepository>,
    submissions: Arc<dyn SubmissionRepository>,
}

impl RecordedSubmissionSink {
    #[must_use]
    pub fn new(
        bank: Arc<dyn QuestionBankRepository>,
        submissions: Arc<dyn SubmissionRepository>,
    ) -> Self {
        Self { bank, submissions }
    }
}

#[async_trait]
impl SubmissionSink for RecordedSubmissionSink {
    async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let key: HashMap<QuestionId, QuestionRecord> = self
            .bank
            .questions_for_quiz(request.quiz_id)
            .await?
            .into_iter()
            .map(|record| (record.question_id, record))
            .collect();

        let score = request
            .answers
            .iter()
            .filter_map(|answer| {
                key.get(&answer.question_id)
                    .map(|record| record.award(answer.selected.as_deref()))
            })
            .sum();

        let record = SubmissionRecord {
            session_id: request.session_id,
            quiz_id: request.quiz_id,
            answers: request.answers.clone(),
            reason: request.reason,
            score: Some(score),
            submitted_at: request.submitted_at,
        };
        match self.submissions.record_submission(&record).await {
            Ok(()) => Ok(SubmissionReceipt { score: Some(score) }),
            Err(StorageError::Conflict) => Err(SubmissionError::Duplicate),
            Err(err) => Err(err.into()),
        }
    }
}

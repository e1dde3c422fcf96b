use proctor_core::model::SessionId;

use super::{
    SqliteRepository,
    mapping::{db, id_i64, map_submission_row, ser},
};
use crate::repository::{StorageError, SubmissionRecord, SubmissionRepository};

#[async_trait::async_trait]
impl SubmissionRepository for SqliteRepository {
    async fn record_submission(&self, submission: &SubmissionRecord) -> Result<(), StorageError> {
        let answers = serde_json::to_string(&submission.answers).map_err(ser)?;

        sqlx::query(
            r"
                INSERT INTO submissions (session_id, quiz_id, answers, reason, score, submitted_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(submission.session_id.to_string())
        .bind(id_i64("quiz_id", submission.quiz_id.value())?)
        .bind(answers)
        .bind(submission.reason.as_str())
        .bind(submission.score.map(i64::from))
        .bind(submission.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn get_submission(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT session_id, quiz_id, answers, reason, score, submitted_at
                FROM submissions
                WHERE session_id = ?1
            ",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        row.as_ref().map(map_submission_row).transpose()
    }
}

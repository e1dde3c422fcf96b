use proctor_core::model::QuizId;
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{db, id_i64, map_question_row, ser},
};
use crate::repository::{QuestionBankRepository, QuestionRecord, QuizRecord, StorageError};

#[async_trait::async_trait]
impl QuestionBankRepository for SqliteRepository {
    async fn upsert_quiz(
        &self,
        quiz: &QuizRecord,
        questions: &[QuestionRecord],
    ) -> Result<(), StorageError> {
        if questions.iter().any(|q| q.quiz_id != quiz.id) {
            return Err(StorageError::Conflict);
        }
        let quiz_id = id_i64("quiz_id", quiz.id.value())?;

        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            r"
                INSERT INTO quizzes (id, title, time_budget_secs)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    time_budget_secs = excluded.time_budget_secs
            ",
        )
        .bind(quiz_id)
        .bind(quiz.title.as_str())
        .bind(quiz.time_budget_secs.map(i64::from))
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        // The question list is replaced wholesale so positions stay dense.
        sqlx::query("DELETE FROM quiz_questions WHERE quiz_id = ?1")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        for question in questions {
            let options = serde_json::to_string(&question.options).map_err(ser)?;
            sqlx::query(
                r"
                    INSERT INTO quiz_questions (
                        question_id, quiz_id, position, prompt, options,
                        points, duration_secs, correct_option
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
            )
            .bind(id_i64("question_id", question.question_id.value())?)
            .bind(quiz_id)
            .bind(i64::from(question.position))
            .bind(question.prompt.as_str())
            .bind(options)
            .bind(i64::from(question.points))
            .bind(question.duration_secs.map(i64::from))
            .bind(question.correct_option.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<QuizRecord>, StorageError> {
        let row = sqlx::query("SELECT id, title, time_budget_secs FROM quizzes WHERE id = ?1")
            .bind(id_i64("quiz_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        row.map(|row| {
            let budget: Option<i64> = row.try_get("time_budget_secs").map_err(ser)?;
            Ok(QuizRecord {
                id,
                title: row.try_get("title").map_err(ser)?,
                time_budget_secs: budget.map(u32::try_from).transpose().map_err(ser)?,
            })
        })
        .transpose()
    }

    async fn questions_for_quiz(&self, id: QuizId) -> Result<Vec<QuestionRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    question_id, quiz_id, position, prompt, options,
                    points, duration_secs, correct_option
                FROM quiz_questions
                WHERE quiz_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(id_i64("quiz_id", id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_question_row(&row)?);
        }
        Ok(out)
    }
}

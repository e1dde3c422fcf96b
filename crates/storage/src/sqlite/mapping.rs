use proctor_core::model::{
    QuestionId, QuizId, SessionId, SubmittedAnswer, ViolationEvent, ViolationKind,
    ViolationPayload,
};
use proctor_core::progression::SubmitReason;
use sqlx::Row;

use crate::repository::{QuestionRecord, StorageError, SubmissionRecord, ViolationLogRecord};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, turning unique-key violations into `Conflict`.
pub(crate) fn db(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(inner) if inner.is_unique_violation() => StorageError::Conflict,
        _ => StorageError::Connection(e.to_string()),
    }
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn session_id_from_str(raw: &str) -> Result<SessionId, StorageError> {
    raw.parse::<SessionId>().map_err(ser)
}

pub(crate) fn map_question_row(row: &sqlx::sqlite::SqliteRow) -> Result<QuestionRecord, StorageError> {
    let options_json: String = row.try_get("options").map_err(ser)?;
    let options: Vec<String> = serde_json::from_str(&options_json).map_err(ser)?;

    Ok(QuestionRecord {
        quiz_id: QuizId::new(i64_to_u64(
            "quiz_id",
            row.try_get::<i64, _>("quiz_id").map_err(ser)?,
        )?),
        question_id: QuestionId::new(i64_to_u64(
            "question_id",
            row.try_get::<i64, _>("question_id").map_err(ser)?,
        )?),
        position: i64_to_u32("position", row.try_get::<i64, _>("position").map_err(ser)?)?,
        prompt: row.try_get("prompt").map_err(ser)?,
        options,
        points: i64_to_u32("points", row.try_get::<i64, _>("points").map_err(ser)?)?,
        duration_secs: row
            .try_get::<Option<i64>, _>("duration_secs")
            .map_err(ser)?
            .map(|v| i64_to_u32("duration_secs", v))
            .transpose()?,
        correct_option: row.try_get("correct_option").map_err(ser)?,
    })
}

pub(crate) fn map_violation_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ViolationLogRecord, StorageError> {
    let kind: String = row.try_get("kind").map_err(ser)?;
    let kind: ViolationKind = kind.parse().map_err(ser)?;
    let payload: String = row.try_get("payload").map_err(ser)?;
    let payload: ViolationPayload = serde_json::from_str(&payload).map_err(ser)?;
    let session_id: String = row.try_get("session_id").map_err(ser)?;

    Ok(ViolationLogRecord {
        id: Some(row.try_get("id").map_err(ser)?),
        session_id: session_id_from_str(&session_id)?,
        event: ViolationEvent::new(kind, row.try_get("occurred_at").map_err(ser)?, payload),
    })
}

pub(crate) fn map_submission_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SubmissionRecord, StorageError> {
    let session_id: String = row.try_get("session_id").map_err(ser)?;
    let answers: String = row.try_get("answers").map_err(ser)?;
    let answers: Vec<SubmittedAnswer> = serde_json::from_str(&answers).map_err(ser)?;
    let reason: String = row.try_get("reason").map_err(ser)?;

    Ok(SubmissionRecord {
        session_id: session_id_from_str(&session_id)?,
        quiz_id: QuizId::new(i64_to_u64(
            "quiz_id",
            row.try_get::<i64, _>("quiz_id").map_err(ser)?,
        )?),
        answers,
        reason: reason.parse::<SubmitReason>().map_err(ser)?,
        score: row
            .try_get::<Option<i64>, _>("score")
            .map_err(ser)?
            .map(|v| i64_to_u32("score", v))
            .transpose()?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    })
}

use proctor_core::model::{SessionId, ViolationEvent};

use super::{
    SqliteRepository,
    mapping::{db, map_violation_row, ser},
};
use crate::repository::{StorageError, ViolationLogRecord, ViolationLogRepository};

#[async_trait::async_trait]
impl ViolationLogRepository for SqliteRepository {
    async fn append_violation(
        &self,
        session_id: SessionId,
        event: &ViolationEvent,
    ) -> Result<i64, StorageError> {
        let payload = serde_json::to_string(&event.payload).map_err(ser)?;

        let res = sqlx::query(
            r"
                INSERT INTO violation_log (session_id, kind, occurred_at, payload)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(session_id.to_string())
        .bind(event.kind.as_str())
        .bind(event.occurred_at)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(res.last_insert_rowid())
    }

    async fn violations_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ViolationLogRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, session_id, kind, occurred_at, payload
                FROM violation_log
                WHERE session_id = ?1
                ORDER BY occurred_at ASC, id ASC
            ",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_violation_row(&row)?);
        }
        Ok(out)
    }
}

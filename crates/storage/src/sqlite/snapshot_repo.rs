use chrono::{DateTime, Utc};
use proctor_core::model::{PersistedSnapshot, SessionId};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{db, ser},
};
use crate::repository::{SnapshotRepository, StorageError};

#[async_trait::async_trait]
impl SnapshotRepository for SqliteRepository {
    async fn save_snapshot(
        &self,
        session_id: SessionId,
        snapshot: &PersistedSnapshot,
        saved_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let payload = snapshot.to_json().map_err(ser)?;

        sqlx::query(
            r"
                INSERT INTO session_snapshots (session_id, payload, saved_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(session_id) DO UPDATE SET
                    payload = excluded.payload,
                    saved_at = excluded.saved_at
            ",
        )
        .bind(session_id.to_string())
        .bind(payload)
        .bind(saved_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PersistedSnapshot>, StorageError> {
        let row = sqlx::query("SELECT payload FROM session_snapshots WHERE session_id = ?1")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get("payload").map_err(ser)?;
        PersistedSnapshot::from_json(&payload).map(Some).map_err(ser)
    }

    async fn clear_snapshot(&self, session_id: SessionId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_snapshots WHERE session_id = ?1")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}

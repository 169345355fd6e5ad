use async_trait::async_trait;
use sqlx::Row;

use super::SqliteStore;
use crate::repository::{GenerationTiming, SessionRecord, SessionStore, StorageError, median};

fn join_list(values: &[String]) -> String {
    values.join(",")
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn map_session_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, StorageError> {
    let ser = |e: sqlx::Error| StorageError::Serialization(e.to_string());
    let tracks: String = row.try_get("tracks").map_err(ser)?;
    let milestone_ids: String = row.try_get("milestone_ids").map_err(ser)?;
    let step_count: i64 = row.try_get("step_count").map_err(ser)?;
    Ok(SessionRecord {
        recorded_at: row.try_get("recorded_at").map_err(ser)?,
        tracks: split_list(&tracks),
        milestone_ids: split_list(&milestone_ids),
        step_count: u32::try_from(step_count)
            .map_err(|_| StorageError::Serialization("step_count overflow".into()))?,
        duration_minutes: row.try_get("duration_minutes").map_err(ser)?,
        accuracy: row.try_get("accuracy").map_err(ser)?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn record_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO session_history (
                recorded_at, tracks, milestone_ids, step_count, duration_minutes, accuracy
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(session.recorded_at)
        .bind(join_list(&session.tracks))
        .bind(join_list(&session.milestone_ids))
        .bind(i64::from(session.step_count))
        .bind(session.duration_minutes)
        .bind(session.accuracy)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT recorded_at, tracks, milestone_ids, step_count, duration_minutes, accuracy
            FROM session_history
            ORDER BY id DESC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        rows.iter().map(map_session_row).collect()
    }

    async fn record_generation_timing(
        &self,
        timing: &GenerationTiming,
    ) -> Result<(), StorageError> {
        let duration = i64::try_from(timing.duration_ms)
            .map_err(|_| StorageError::Serialization("duration_ms overflow".into()))?;
        sqlx::query(
            r"
            INSERT INTO generation_stats (recorded_at, duration_ms, step_count, success)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(timing.recorded_at)
        .bind(duration)
        .bind(i64::from(timing.step_count))
        .bind(i64::from(timing.success))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn median_generation_ms(&self, last_n: u32) -> Result<Option<f64>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT duration_ms FROM generation_stats
            WHERE success = 1
            ORDER BY id DESC
            LIMIT ?1
            ",
        )
        .bind(i64::from(last_n))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        let durations = rows
            .iter()
            .map(|row| {
                let ms: i64 = row
                    .try_get("duration_ms")
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(ms as f64)
            })
            .collect::<Result<Vec<f64>, StorageError>>()?;
        Ok(median(durations))
    }
}

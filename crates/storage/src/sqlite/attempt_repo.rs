use async_trait::async_trait;
use sqlx::Row;

use super::SqliteStore;
use crate::repository::{AttemptAggregate, AttemptRecord, AttemptStore, StorageError};

fn count_u32(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<u32, StorageError> {
    let value: i64 = row
        .try_get(column)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    u32::try_from(value).map_err(|_| StorageError::Serialization(format!("{column} overflow")))
}

#[async_trait]
impl AttemptStore for SqliteStore {
    async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO attempts (label, success, latency_ms, wrong_notes, simultaneous, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(&attempt.label)
        .bind(i64::from(attempt.success))
        .bind(attempt.latency_ms)
        .bind(i64::from(attempt.wrong_notes))
        .bind(i64::from(attempt.simultaneous))
        .bind(attempt.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn aggregates(&self) -> Result<Vec<AttemptAggregate>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                label,
                SUM(success) AS successes,
                COUNT(*) - SUM(success) AS failures,
                AVG(CASE WHEN success = 1 THEN latency_ms END) AS avg_latency_ms,
                SUM(wrong_notes) AS wrong_note_total,
                SUM(CASE WHEN success = 1 AND simultaneous = 1 THEN 1 ELSE 0 END)
                    AS simultaneous_successes
            FROM attempts
            GROUP BY label
            ORDER BY label
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(AttemptAggregate {
                    label: row
                        .try_get("label")
                        .map_err(|e| StorageError::Serialization(e.to_string()))?,
                    successes: count_u32(row, "successes")?,
                    failures: count_u32(row, "failures")?,
                    avg_latency_ms: row
                        .try_get("avg_latency_ms")
                        .map_err(|e| StorageError::Serialization(e.to_string()))?,
                    wrong_note_total: count_u32(row, "wrong_note_total")?,
                    simultaneous_successes: count_u32(row, "simultaneous_successes")?,
                })
            })
            .collect()
    }
}

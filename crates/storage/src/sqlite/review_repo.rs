use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use keycoach_core::model::ReviewItem;

use super::SqliteStore;
use crate::repository::{ReviewStore, StorageError};

fn map_review_row(row: &sqlx::sqlite::SqliteRow) -> Result<ReviewItem, StorageError> {
    let ser = |e: sqlx::Error| StorageError::Serialization(e.to_string());
    let review_count: i64 = row.try_get("review_count").map_err(ser)?;
    Ok(ReviewItem {
        item_type: row.try_get("item_type").map_err(ser)?,
        item_id: row.try_get("item_id").map_err(ser)?,
        next_review: row.try_get("next_review").map_err(ser)?,
        interval_days: row.try_get("interval_days").map_err(ser)?,
        ease_factor: row.try_get("ease_factor").map_err(ser)?,
        review_count: u32::try_from(review_count)
            .map_err(|_| StorageError::Serialization("review_count overflow".into()))?,
    })
}

#[async_trait]
impl ReviewStore for SqliteStore {
    async fn get(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> Result<Option<ReviewItem>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT item_type, item_id, next_review, interval_days, ease_factor, review_count
            FROM spaced_repetition
            WHERE item_type = ?1 AND item_id = ?2
            ",
        )
        .bind(item_type)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        row.as_ref().map(map_review_row).transpose()
    }

    async fn upsert(&self, item: &ReviewItem) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO spaced_repetition (
                item_type, item_id, next_review, interval_days, ease_factor, review_count
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(item_type, item_id) DO UPDATE SET
                next_review = excluded.next_review,
                interval_days = excluded.interval_days,
                ease_factor = excluded.ease_factor,
                review_count = excluded.review_count
            ",
        )
        .bind(&item.item_type)
        .bind(&item.item_id)
        .bind(item.next_review)
        .bind(item.interval_days)
        .bind(item.ease_factor)
        .bind(i64::from(item.review_count))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ReviewItem>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT item_type, item_id, next_review, interval_days, ease_factor, review_count
            FROM spaced_repetition
            WHERE next_review <= ?1
            ORDER BY next_review ASC
            LIMIT ?2
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        rows.iter().map(map_review_row).collect()
    }
}

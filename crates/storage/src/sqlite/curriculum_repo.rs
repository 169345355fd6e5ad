use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use keycoach_core::curriculum::{self, Advancement};
use keycoach_core::model::{Milestone, MilestoneStatus, TrackLibrary};

use super::SqliteStore;
use crate::repository::{CurriculumStore, StorageError};

fn map_milestone_row(row: &sqlx::sqlite::SqliteRow) -> Result<Milestone, StorageError> {
    let ser = |e: sqlx::Error| StorageError::Serialization(e.to_string());
    let status_text: String = row.try_get("status").map_err(ser)?;
    let status = MilestoneStatus::parse(&status_text)
        .ok_or_else(|| StorageError::Serialization(format!("unknown status: {status_text}")))?;
    let order: i64 = row.try_get("sort_order").map_err(ser)?;
    let attempts: i64 = row.try_get("attempts").map_err(ser)?;
    let successes: i64 = row.try_get("successes").map_err(ser)?;
    Ok(Milestone {
        track: row.try_get("track").map_err(ser)?,
        id: row.try_get("milestone_id").map_err(ser)?,
        order: u32::try_from(order)
            .map_err(|_| StorageError::Serialization("sort_order overflow".into()))?,
        status,
        attempts: u32::try_from(attempts)
            .map_err(|_| StorageError::Serialization("attempts overflow".into()))?,
        successes: u32::try_from(successes)
            .map_err(|_| StorageError::Serialization("successes overflow".into()))?,
        unlocked_at: row.try_get("unlocked_at").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

const MILESTONE_COLUMNS: &str = r"
    track, milestone_id, sort_order, status, attempts, successes,
    unlocked_at, completed_at
";

impl SqliteStore {
    async fn persist_milestone(&self, milestone: &Milestone) -> Result<(), StorageError> {
        sqlx::query(
            r"
            UPDATE curriculum_state
            SET status = ?3, attempts = ?4, successes = ?5,
                unlocked_at = ?6, completed_at = ?7
            WHERE track = ?1 AND milestone_id = ?2
            ",
        )
        .bind(&milestone.track)
        .bind(&milestone.id)
        .bind(milestone.status.as_str())
        .bind(i64::from(milestone.attempts))
        .bind(i64::from(milestone.successes))
        .bind(milestone.unlocked_at)
        .bind(milestone.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CurriculumStore for SqliteStore {
    async fn init_milestones(
        &self,
        library: &TrackLibrary,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        for (track, specs) in library.tracks() {
            for spec in specs {
                let initial = Milestone::initial(track, spec, now);
                sqlx::query(
                    r"
                    INSERT INTO curriculum_state (
                        track, milestone_id, sort_order, status, attempts,
                        successes, unlocked_at, completed_at
                    )
                    VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, NULL)
                    ON CONFLICT(track, milestone_id) DO NOTHING
                    ",
                )
                .bind(&initial.track)
                .bind(&initial.id)
                .bind(i64::from(initial.order))
                .bind(initial.status.as_str())
                .bind(initial.unlocked_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }
        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn milestones(&self, track: &str) -> Result<Vec<Milestone>, StorageError> {
        let sql = format!(
            "SELECT {MILESTONE_COLUMNS} FROM curriculum_state WHERE track = ?1 ORDER BY sort_order"
        );
        let rows = sqlx::query(&sql)
            .bind(track)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        rows.iter().map(map_milestone_row).collect()
    }

    async fn active_milestones(&self) -> Result<Vec<Milestone>, StorageError> {
        let sql = format!(
            "SELECT {MILESTONE_COLUMNS} FROM curriculum_state
             WHERE status = 'active' ORDER BY track, sort_order"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        rows.iter().map(map_milestone_row).collect()
    }

    async fn record_milestone_attempt(
        &self,
        track: &str,
        milestone_id: &str,
        success: bool,
    ) -> Result<Milestone, StorageError> {
        let result = sqlx::query(
            r"
            UPDATE curriculum_state
            SET attempts = attempts + 1, successes = successes + ?3
            WHERE track = ?1 AND milestone_id = ?2
            ",
        )
        .bind(track)
        .bind(milestone_id)
        .bind(i64::from(success))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let sql = format!(
            "SELECT {MILESTONE_COLUMNS} FROM curriculum_state
             WHERE track = ?1 AND milestone_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(track)
            .bind(milestone_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        map_milestone_row(&row)
    }

    async fn advance_milestone(
        &self,
        track: &str,
        milestone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Advancement, StorageError> {
        let mut rows = self.milestones(track).await?;
        let advancement =
            curriculum::advance_milestone(&mut rows, milestone_id, now).map_err(|e| match e {
                curriculum::CurriculumError::UnknownMilestone(_) => StorageError::NotFound,
                curriculum::CurriculumError::NotActive(_) => StorageError::Conflict,
            })?;

        for row in &rows {
            let touched = row.id == advancement.completed_id
                || advancement.unlocked_id.as_deref() == Some(row.id.as_str());
            if touched {
                self.persist_milestone(row).await?;
            }
        }
        Ok(advancement)
    }
}

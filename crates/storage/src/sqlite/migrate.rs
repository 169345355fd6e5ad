use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema: attempts, curriculum state, spaced
/// repetition, session history, generation stats, and indexes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempts (
                    id INTEGER PRIMARY KEY,
                    label TEXT NOT NULL,
                    success INTEGER NOT NULL CHECK (success IN (0, 1)),
                    latency_ms REAL NOT NULL,
                    wrong_notes INTEGER NOT NULL CHECK (wrong_notes >= 0),
                    simultaneous INTEGER NOT NULL CHECK (simultaneous IN (0, 1)),
                    recorded_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS curriculum_state (
                    track TEXT NOT NULL,
                    milestone_id TEXT NOT NULL,
                    sort_order INTEGER NOT NULL CHECK (sort_order >= 1),
                    status TEXT NOT NULL,
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    successes INTEGER NOT NULL CHECK (successes >= 0),
                    unlocked_at TEXT,
                    completed_at TEXT,
                    PRIMARY KEY (track, milestone_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS spaced_repetition (
                    item_type TEXT NOT NULL,
                    item_id TEXT NOT NULL,
                    next_review TEXT NOT NULL,
                    interval_days REAL NOT NULL,
                    ease_factor REAL NOT NULL CHECK (ease_factor >= 1.3),
                    review_count INTEGER NOT NULL CHECK (review_count >= 0),
                    PRIMARY KEY (item_type, item_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_history (
                    id INTEGER PRIMARY KEY,
                    recorded_at TEXT NOT NULL,
                    tracks TEXT NOT NULL,
                    milestone_ids TEXT NOT NULL,
                    step_count INTEGER NOT NULL CHECK (step_count >= 0),
                    duration_minutes REAL NOT NULL,
                    accuracy REAL NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS generation_stats (
                    id INTEGER PRIMARY KEY,
                    recorded_at TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL CHECK (duration_ms >= 0),
                    step_count INTEGER NOT NULL CHECK (step_count >= 0),
                    success INTEGER NOT NULL CHECK (success IN (0, 1))
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempts_label
                    ON attempts (label, recorded_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_curriculum_status
                    ON curriculum_state (status, track, sort_order);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_spaced_repetition_due
                    ON spaced_repetition (next_review);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}

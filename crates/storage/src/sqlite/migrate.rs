use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema (sessions with summary statistics, per-item
/// results, the offline content cache, and indexes).
#[allow(clippy::too_many_lines)]
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
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    mode TEXT NOT NULL,
                    level TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    tag_ids TEXT NOT NULL,
                    item_count INTEGER NOT NULL CHECK (item_count >= 1),
                    total_items INTEGER NOT NULL CHECK (total_items >= 0),
                    correct_count INTEGER NOT NULL CHECK (correct_count >= 0),
                    incorrect_count INTEGER NOT NULL CHECK (incorrect_count >= 0),
                    skipped_count INTEGER NOT NULL CHECK (skipped_count >= 0),
                    max_streak INTEGER NOT NULL CHECK (max_streak >= 0),
                    avg_pronunciation REAL,
                    avg_accuracy REAL,
                    avg_fluency REAL,
                    avg_completeness REAL,
                    started_at TEXT NOT NULL,
                    completed_at TEXT NOT NULL,
                    sync_status TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_results (
                    session_id TEXT NOT NULL,
                    sequence_number INTEGER NOT NULL CHECK (sequence_number >= 1),
                    item_id TEXT NOT NULL,
                    response TEXT NOT NULL,
                    recognized_text TEXT,
                    pronunciation REAL,
                    accuracy REAL,
                    fluency REAL,
                    completeness REAL,
                    word_scores TEXT,
                    response_time_ms INTEGER NOT NULL CHECK (response_time_ms >= 0),
                    PRIMARY KEY (session_id, sequence_number),
                    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS cached_items (
                    id TEXT PRIMARY KEY,
                    text TEXT NOT NULL,
                    audio_url TEXT NOT NULL,
                    level TEXT NOT NULL,
                    kind TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS cached_item_tags (
                    item_id TEXT NOT NULL,
                    tag_id TEXT NOT NULL,
                    PRIMARY KEY (item_id, tag_id),
                    FOREIGN KEY (item_id) REFERENCES cached_items(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_sessions_completed
                    ON sessions (completed_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_sessions_mode_level
                    ON sessions (mode, level);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_sessions_sync_status
                    ON sessions (sync_status, completed_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_cached_items_level_kind
                    ON cached_items (level, kind);
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

use sqlx::Row;

use parrot_core::model::{Session, SessionId, SyncStatus};

use super::mapping::{
    map_config_row, map_result_row, map_sync_status, ser, session_id_from_text, tag_ids_to_json,
    u32_from_i64, word_scores_to_json,
};
use super::SqliteRepository;
use crate::repository::{HistoryFilter, SessionStore, StorageError};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

async fn load_results(
    repo: &SqliteRepository,
    session_id: &str,
) -> Result<Vec<parrot_core::model::ResultEntry>, StorageError> {
    let rows = sqlx::query(
        r"
            SELECT
                item_id, sequence_number, response, recognized_text,
                pronunciation, accuracy, fluency, completeness, word_scores,
                response_time_ms
            FROM session_results
            WHERE session_id = ?1
            ORDER BY sequence_number ASC
        ",
    )
    .bind(session_id)
    .fetch_all(repo.pool())
    .await
    .map_err(conn)?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(map_result_row(&row)?);
    }
    Ok(results)
}

fn map_session_head(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(SessionId, u32, SyncStatus), StorageError> {
    let id = session_id_from_text(&row.try_get::<String, _>("id").map_err(ser)?)?;
    let total_items =
        u32_from_i64("total_items", row.try_get::<i64, _>("total_items").map_err(ser)?)?;
    let sync_status = map_sync_status(&row.try_get::<String, _>("sync_status").map_err(ser)?)?;
    Ok((id, total_items, sync_status))
}

async fn rebuild_session(
    repo: &SqliteRepository,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<Session, StorageError> {
    let (id, total_items, sync_status) = map_session_head(row)?;
    let config = map_config_row(row)?;
    let results = load_results(repo, &id.to_string()).await?;

    Session::from_persisted(
        id,
        config,
        results,
        total_items,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        sync_status,
    )
    .map_err(ser)
}

const SESSION_COLUMNS: &str = r"
    id, mode, level, kind, tag_ids, item_count, total_items,
    started_at, completed_at, sync_status
";

#[async_trait::async_trait]
impl SessionStore for SqliteRepository {
    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let completed_at = session
            .completed_at()
            .ok_or_else(|| StorageError::Serialization("session is not complete".into()))?;
        let totals = session
            .totals()
            .ok_or_else(|| StorageError::Serialization("session has no totals".into()))?;
        let config = session.config();

        let mut tx = self.pool().begin().await.map_err(conn)?;

        let inserted = sqlx::query(
            r"
                INSERT INTO sessions (
                    id, mode, level, kind, tag_ids, item_count, total_items,
                    correct_count, incorrect_count, skipped_count, max_streak,
                    avg_pronunciation, avg_accuracy, avg_fluency, avg_completeness,
                    started_at, completed_at, sync_status
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(session.id().to_string())
        .bind(config.mode().as_str())
        .bind(config.level().as_str())
        .bind(config.kind().as_str())
        .bind(tag_ids_to_json(config.tag_ids())?)
        .bind(i64::from(config.item_count()))
        .bind(i64::from(session.total_items()))
        .bind(i64::from(totals.correct))
        .bind(i64::from(totals.incorrect))
        .bind(i64::from(totals.skipped))
        .bind(i64::from(totals.max_streak))
        .bind(totals.avg_pronunciation)
        .bind(totals.avg_accuracy)
        .bind(totals.avg_fluency)
        .bind(totals.avg_completeness)
        .bind(session.started_at())
        .bind(completed_at)
        .bind(session.sync_status().as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if inserted.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        for entry in session.results() {
            let response_time = i64::try_from(entry.response_time_ms())
                .map_err(|_| StorageError::Serialization("response_time_ms overflow".into()))?;
            sqlx::query(
                r"
                    INSERT INTO session_results (
                        session_id, sequence_number, item_id, response,
                        recognized_text, pronunciation, accuracy, fluency,
                        completeness, word_scores, response_time_ms
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ",
            )
            .bind(session.id().to_string())
            .bind(i64::from(entry.sequence_number()))
            .bind(entry.item_id().to_string())
            .bind(entry.response().as_str())
            .bind(entry.score().map(|s| s.recognized_text().to_owned()))
            .bind(entry.score().map(|s| s.pronunciation()))
            .bind(entry.score().and_then(|s| s.accuracy()))
            .bind(entry.score().and_then(|s| s.fluency()))
            .bind(entry.score().and_then(|s| s.completeness()))
            .bind(
                entry
                    .score()
                    .map(|s| word_scores_to_json(s.words()))
                    .transpose()?
                    .flatten(),
            )
            .bind(response_time)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(conn)?;

        match row {
            Some(row) => Ok(Some(rebuild_session(self, &row).await?)),
            None => Ok(None),
        }
    }

    async fn update_sync_status(
        &self,
        id: SessionId,
        status: SyncStatus,
    ) -> Result<(), StorageError> {
        let updated = sqlx::query("UPDATE sessions SET sync_status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(conn)?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_unsynced(&self) -> Result<Vec<SessionId>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id FROM sessions
                WHERE sync_status IN ('pending', 'failed')
                ORDER BY completed_at ASC, id ASC
            ",
        )
        .fetch_all(self.pool())
        .await
        .map_err(conn)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(session_id_from_text(
                &row.try_get::<String, _>("id").map_err(ser)?,
            )?);
        }
        Ok(ids)
    }

    async fn list_page(
        &self,
        filter: &HistoryFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Session>, StorageError> {
        let mut sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE 1 = 1");

        let mut bind_index = 1;
        if filter.mode.is_some() {
            sql.push_str(" AND mode = ?");
            sql.push_str(&bind_index.to_string());
            bind_index += 1;
        }
        if filter.level.is_some() {
            sql.push_str(" AND level = ?");
            sql.push_str(&bind_index.to_string());
            bind_index += 1;
        }
        if filter.completed_from.is_some() {
            sql.push_str(" AND completed_at >= ?");
            sql.push_str(&bind_index.to_string());
            bind_index += 1;
        }
        if filter.completed_until.is_some() {
            sql.push_str(" AND completed_at <= ?");
            sql.push_str(&bind_index.to_string());
            bind_index += 1;
        }
        sql.push_str(" ORDER BY completed_at DESC, id DESC");
        sql.push_str(&format!(" LIMIT ?{bind_index}"));
        bind_index += 1;
        sql.push_str(&format!(" OFFSET ?{bind_index}"));

        let mut query = sqlx::query(&sql);
        if let Some(mode) = filter.mode {
            query = query.bind(mode.as_str());
        }
        if let Some(level) = filter.level {
            query = query.bind(level.as_str());
        }
        if let Some(from) = filter.completed_from {
            query = query.bind(from);
        }
        if let Some(until) = filter.completed_until {
            query = query.bind(until);
        }
        query = query.bind(i64::from(limit)).bind(i64::from(offset));

        let rows = query.fetch_all(self.pool()).await.map_err(conn)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(rebuild_session(self, &row).await?);
        }
        Ok(sessions)
    }
}

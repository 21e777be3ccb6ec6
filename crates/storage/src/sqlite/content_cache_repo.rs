use sqlx::Row;

use parrot_core::model::{ContentItem, ItemKind, Level, TagId};

use super::mapping::{map_item_row, ser, tag_id_from_text};
use super::SqliteRepository;
use crate::repository::{ContentCache, StorageError};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl ContentCache for SqliteRepository {
    async fn store_items(&self, items: &[ContentItem]) -> Result<(), StorageError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool().begin().await.map_err(conn)?;

        for item in items {
            sqlx::query(
                r"
                    INSERT INTO cached_items (id, text, audio_url, level, kind)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        text = excluded.text,
                        audio_url = excluded.audio_url,
                        level = excluded.level,
                        kind = excluded.kind
                ",
            )
            .bind(item.id().to_string())
            .bind(item.text().to_owned())
            .bind(item.audio_url().as_str())
            .bind(item.level().as_str())
            .bind(item.kind().as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            sqlx::query("DELETE FROM cached_item_tags WHERE item_id = ?1")
                .bind(item.id().to_string())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;

            for tag in item.tag_ids() {
                sqlx::query(
                    r"
                        INSERT INTO cached_item_tags (item_id, tag_id)
                        VALUES (?1, ?2)
                        ON CONFLICT(item_id, tag_id) DO NOTHING
                    ",
                )
                .bind(item.id().to_string())
                .bind(tag.to_string())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn matching_items(
        &self,
        level: Level,
        kind: ItemKind,
        tag_ids: &[TagId],
    ) -> Result<Vec<ContentItem>, StorageError> {
        // AND tag semantics: the item must carry every requested tag.
        let mut sql = String::from(
            r"
                SELECT i.id, i.text, i.audio_url, i.level, i.kind
                FROM cached_items i
                WHERE i.level = ?1 AND i.kind = ?2
            ",
        );
        if !tag_ids.is_empty() {
            sql.push_str(
                r"
                AND i.id IN (
                    SELECT item_id FROM cached_item_tags
                    WHERE tag_id IN (
                ",
            );
            for n in 0..tag_ids.len() {
                if n > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                sql.push_str(&(n + 3).to_string());
            }
            sql.push_str(&format!(
                r")
                    GROUP BY item_id
                    HAVING COUNT(DISTINCT tag_id) = {}
                )",
                tag_ids.len()
            ));
        }
        sql.push_str(" ORDER BY i.id ASC");

        let mut query = sqlx::query(&sql).bind(level.as_str()).bind(kind.as_str());
        for tag in tag_ids {
            query = query.bind(tag.to_string());
        }

        let rows = query.fetch_all(self.pool()).await.map_err(conn)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(ser)?;
            let tag_rows =
                sqlx::query("SELECT tag_id FROM cached_item_tags WHERE item_id = ?1")
                    .bind(&id)
                    .fetch_all(self.pool())
                    .await
                    .map_err(conn)?;
            let mut tags = Vec::with_capacity(tag_rows.len());
            for tag_row in tag_rows {
                tags.push(tag_id_from_text(
                    &tag_row.try_get::<String, _>("tag_id").map_err(ser)?,
                )?);
            }
            items.push(map_item_row(&row, tags)?);
        }
        Ok(items)
    }
}

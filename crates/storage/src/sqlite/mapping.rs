use sqlx::Row;
use uuid::Uuid;

use parrot_core::model::{
    ItemId, ItemKind, Level, ResultEntry, ScoreReport, SessionConfig, SessionId, SessionMode,
    SyncStatus, TagId, UserResponse, WordScore,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn uuid_from_text(field: &'static str, raw: &str) -> Result<Uuid, StorageError> {
    raw.parse::<Uuid>()
        .map_err(|_| StorageError::Serialization(format!("invalid {field}: {raw}")))
}

pub(crate) fn session_id_from_text(raw: &str) -> Result<SessionId, StorageError> {
    Ok(SessionId::new(uuid_from_text("session_id", raw)?))
}

pub(crate) fn item_id_from_text(raw: &str) -> Result<ItemId, StorageError> {
    Ok(ItemId::new(uuid_from_text("item_id", raw)?))
}

pub(crate) fn tag_id_from_text(raw: &str) -> Result<TagId, StorageError> {
    Ok(TagId::new(uuid_from_text("tag_id", raw)?))
}

pub(crate) fn tag_ids_to_json(tag_ids: &[TagId]) -> Result<String, StorageError> {
    let raw: Vec<String> = tag_ids.iter().map(ToString::to_string).collect();
    serde_json::to_string(&raw).map_err(ser)
}

pub(crate) fn tag_ids_from_json(raw: &str) -> Result<Vec<TagId>, StorageError> {
    let texts: Vec<String> = serde_json::from_str(raw).map_err(ser)?;
    texts
        .iter()
        .map(|t| Ok(TagId::new(uuid_from_text("tag_id", t)?)))
        .collect()
}

pub(crate) fn word_scores_to_json(words: &[WordScore]) -> Result<Option<String>, StorageError> {
    if words.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(words).map(Some).map_err(ser)
}

pub(crate) fn word_scores_from_json(raw: Option<String>) -> Result<Vec<WordScore>, StorageError> {
    match raw {
        Some(text) => serde_json::from_str(&text).map_err(ser),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_config_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionConfig, StorageError> {
    let mode: SessionMode = row
        .try_get::<String, _>("mode")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let level: Level = row
        .try_get::<String, _>("level")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let kind: ItemKind = row
        .try_get::<String, _>("kind")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let tag_ids = tag_ids_from_json(&row.try_get::<String, _>("tag_ids").map_err(ser)?)?;
    let item_count = u32_from_i64("item_count", row.try_get::<i64, _>("item_count").map_err(ser)?)?;

    SessionConfig::new(mode, level, kind, tag_ids, item_count).map_err(ser)
}

pub(crate) fn map_sync_status(raw: &str) -> Result<SyncStatus, StorageError> {
    raw.parse::<SyncStatus>().map_err(ser)
}

pub(crate) fn map_result_row(row: &sqlx::sqlite::SqliteRow) -> Result<ResultEntry, StorageError> {
    let item_id = item_id_from_text(&row.try_get::<String, _>("item_id").map_err(ser)?)?;
    let sequence_number = u32_from_i64(
        "sequence_number",
        row.try_get::<i64, _>("sequence_number").map_err(ser)?,
    )?;
    let response: UserResponse = row
        .try_get::<String, _>("response")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;

    let pronunciation: Option<f64> = row.try_get("pronunciation").map_err(ser)?;
    let score = match pronunciation {
        Some(overall) => {
            let recognized: Option<String> = row.try_get("recognized_text").map_err(ser)?;
            let words =
                word_scores_from_json(row.try_get::<Option<String>, _>("word_scores").map_err(ser)?)?;
            Some(
                ScoreReport::new(
                    recognized.unwrap_or_default(),
                    overall,
                    row.try_get("accuracy").map_err(ser)?,
                    row.try_get("fluency").map_err(ser)?,
                    row.try_get("completeness").map_err(ser)?,
                    words,
                )
                .map_err(ser)?,
            )
        }
        None => None,
    };

    let response_time_i64: i64 = row.try_get("response_time_ms").map_err(ser)?;
    let response_time_ms = u64::try_from(response_time_i64).map_err(|_| {
        StorageError::Serialization(format!("invalid response_time_ms: {response_time_i64}"))
    })?;

    ResultEntry::new(item_id, sequence_number, response, score, response_time_ms).map_err(ser)
}

pub(crate) fn map_item_row(
    row: &sqlx::sqlite::SqliteRow,
    tag_ids: Vec<TagId>,
) -> Result<parrot_core::model::ContentItem, StorageError> {
    let id = item_id_from_text(&row.try_get::<String, _>("id").map_err(ser)?)?;
    let level: Level = row
        .try_get::<String, _>("level")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let kind: ItemKind = row
        .try_get::<String, _>("kind")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;

    parrot_core::model::ContentItem::new(
        id,
        row.try_get::<String, _>("text").map_err(ser)?,
        row.try_get::<String, _>("audio_url").map_err(ser)?,
        level,
        kind,
        tag_ids,
    )
    .map_err(ser)
}

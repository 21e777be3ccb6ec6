use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use parrot_core::model::{
    ContentItem, ItemKind, Level, Session, SessionId, SessionMode, SyncStatus, TagId,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Conjunctive filters for history queries.
///
/// Every set field must match; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub mode: Option<SessionMode>,
    pub level: Option<Level>,
    pub completed_from: Option<DateTime<Utc>>,
    pub completed_until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(mode) = self.mode {
            if session.config().mode() != mode {
                return false;
            }
        }
        if let Some(level) = self.level {
            if session.config().level() != level {
                return false;
            }
        }
        let Some(completed_at) = session.completed_at() else {
            return false;
        };
        if let Some(from) = self.completed_from {
            if completed_at < from {
                return false;
            }
        }
        if let Some(until) = self.completed_until {
            if completed_at > until {
                return false;
            }
        }
        true
    }
}

/// Durable store for completed sessions.
///
/// Only finished sessions are ever persisted; after the initial save the
/// single mutable column is the sync status.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a completed session together with its results, atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when the session id already exists,
    /// or other storage errors.
    async fn save_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Fetch one session with its full results list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures. A missing id is `Ok(None)`.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError>;

    /// Overwrite the sync status of a saved session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session is not saved.
    async fn update_sync_status(
        &self,
        id: SessionId,
        status: SyncStatus,
    ) -> Result<(), StorageError>;

    /// Ids of sessions still awaiting a successful sync (`pending` or
    /// `failed`), oldest completion first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn list_unsynced(&self) -> Result<Vec<SessionId>, StorageError>;

    /// One page of history, newest completion first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn list_page(
        &self,
        filter: &HistoryFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Session>, StorageError>;
}

/// Local cache of practice content for offline sessions.
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Insert or refresh cached items.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the items cannot be stored.
    async fn store_items(&self, items: &[ContentItem]) -> Result<(), StorageError>;

    /// All cached items matching level, kind, and every given tag.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    async fn matching_items(
        &self,
        level: Level,
        kind: ItemKind,
        tag_ids: &[TagId],
    ) -> Result<Vec<ContentItem>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    items: Arc<Mutex<HashMap<parrot_core::model::ItemId, ContentItem>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryRepository {
    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard.contains_key(&session.id()) {
            return Err(StorageError::Conflict);
        }
        guard.insert(session.id(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&id).cloned())
    }

    async fn update_sync_status(
        &self,
        id: SessionId,
        status: SyncStatus,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let session = guard.get_mut(&id).ok_or(StorageError::NotFound)?;
        session
            .set_sync_status(status)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(())
    }

    async fn list_unsynced(&self) -> Result<Vec<SessionId>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut waiting: Vec<_> = guard
            .values()
            .filter(|s| {
                matches!(s.sync_status(), SyncStatus::Pending | SyncStatus::Failed)
            })
            .collect();
        waiting.sort_by_key(|s| (s.completed_at(), s.id().value()));
        Ok(waiting.iter().map(|s| s.id()).collect())
    }

    async fn list_page(
        &self,
        filter: &HistoryFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Session>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut matching: Vec<_> = guard.values().filter(|s| filter.matches(s)).collect();
        matching.sort_by_key(|s| std::cmp::Reverse((s.completed_at(), s.id().value())));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContentCache for InMemoryRepository {
    async fn store_items(&self, items: &[ContentItem]) -> Result<(), StorageError> {
        let mut guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        for item in items {
            guard.insert(item.id(), item.clone());
        }
        Ok(())
    }

    async fn matching_items(
        &self,
        level: Level,
        kind: ItemKind,
        tag_ids: &[TagId],
    ) -> Result<Vec<ContentItem>, StorageError> {
        let guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<_> = guard
            .values()
            .filter(|item| {
                item.level() == level && item.kind() == kind && item.has_all_tags(tag_ids)
            })
            .cloned()
            .collect();
        found.sort_by_key(ContentItem::id);
        Ok(found)
    }
}

/// Aggregates the storage ports behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionStore>,
    pub content: Arc<dyn ContentCache>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let sessions: Arc<dyn SessionStore> = Arc::new(repo.clone());
        let content: Arc<dyn ContentCache> = Arc::new(repo);
        Self { sessions, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parrot_core::model::{ItemId, ResultEntry, SessionConfig, UserResponse};
    use parrot_core::time::fixed_now;
    use uuid::Uuid;

    fn config(mode: SessionMode, level: Level) -> SessionConfig {
        SessionConfig::new(
            mode,
            level,
            ItemKind::Question,
            vec![TagId::new(Uuid::new_v4())],
            10,
        )
        .unwrap()
    }

    fn completed_session(mode: SessionMode, level: Level, offset_secs: i64) -> Session {
        let started = fixed_now() + Duration::seconds(offset_secs);
        let mut session =
            Session::new(SessionId::generate(), config(mode, level), 1, started);
        session
            .push_result(
                ResultEntry::new(
                    ItemId::new(Uuid::new_v4()),
                    1,
                    UserResponse::Correct,
                    None,
                    250,
                )
                .unwrap(),
            )
            .unwrap();
        session.finalize(started + Duration::seconds(30)).unwrap();
        session
    }

    #[tokio::test]
    async fn save_rejects_duplicate_id() {
        let repo = InMemoryRepository::new();
        let session = completed_session(SessionMode::ListenOnly, Level::A1, 0);
        repo.save_session(&session).await.unwrap();
        let err = repo.save_session(&session).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn unsynced_excludes_synced_sessions() {
        let repo = InMemoryRepository::new();
        let mut synced = completed_session(SessionMode::ListenOnly, Level::A1, 0);
        synced.set_sync_status(SyncStatus::Syncing).unwrap();
        synced.set_sync_status(SyncStatus::Synced).unwrap();
        let waiting = completed_session(SessionMode::ListenOnly, Level::A1, 60);

        repo.save_session(&synced).await.unwrap();
        repo.save_session(&waiting).await.unwrap();

        let unsynced = repo.list_unsynced().await.unwrap();
        assert_eq!(unsynced, vec![waiting.id()]);
    }

    #[tokio::test]
    async fn page_filters_compose_conjunctively() {
        let repo = InMemoryRepository::new();
        let a = completed_session(SessionMode::ListenOnly, Level::A1, 0);
        let b = completed_session(SessionMode::ListenAndRepeat, Level::A1, 60);
        let c = completed_session(SessionMode::ListenOnly, Level::B2, 120);
        for s in [&a, &b, &c] {
            repo.save_session(s).await.unwrap();
        }

        let filter = HistoryFilter {
            mode: Some(SessionMode::ListenOnly),
            level: Some(Level::A1),
            ..HistoryFilter::default()
        };
        let page = repo.list_page(&filter, 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id(), a.id());
    }

    #[tokio::test]
    async fn pages_order_newest_first() {
        let repo = InMemoryRepository::new();
        let older = completed_session(SessionMode::ListenOnly, Level::A1, 0);
        let newer = completed_session(SessionMode::ListenOnly, Level::A1, 600);
        repo.save_session(&older).await.unwrap();
        repo.save_session(&newer).await.unwrap();

        let page = repo
            .list_page(&HistoryFilter::default(), 0, 1)
            .await
            .unwrap();
        assert_eq!(page[0].id(), newer.id());
    }

    #[tokio::test]
    async fn cache_matches_on_all_tags() {
        let repo = InMemoryRepository::new();
        let t1 = TagId::new(Uuid::new_v4());
        let t2 = TagId::new(Uuid::new_v4());
        let both = ContentItem::new(
            ItemId::new(Uuid::new_v4()),
            "How are you today?",
            "https://cdn.example.com/q1.mp3",
            Level::A1,
            ItemKind::Question,
            vec![t1, t2],
        )
        .unwrap();
        let only_first = ContentItem::new(
            ItemId::new(Uuid::new_v4()),
            "Where do you live?",
            "https://cdn.example.com/q2.mp3",
            Level::A1,
            ItemKind::Question,
            vec![t1],
        )
        .unwrap();
        repo.store_items(&[both.clone(), only_first]).await.unwrap();

        let found = repo
            .matching_items(Level::A1, ItemKind::Question, &[t1, t2])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), both.id());
    }
}

//! Paginated, filterable review of past sessions.

use std::sync::Arc;

use tracing::debug;

use parrot_core::model::Session;
use storage::repository::{HistoryFilter, SessionStore, StorageError};

/// Default page size for history views.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Stateful pager over the local session store.
///
/// The local store is authoritative for display. Filters compose
/// conjunctively; changing them resets pagination to the first page.
/// `load_more` is deliberately a no-op, not an error, while a load is in
/// flight or when no further pages exist.
pub struct HistoryQueryEngine {
    store: Arc<dyn SessionStore>,
    page_size: u32,
    filter: HistoryFilter,
    items: Vec<Session>,
    next_offset: u32,
    has_more: bool,
    is_loading_more: bool,
}

impl HistoryQueryEngine {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            filter: HistoryFilter::default(),
            items: Vec::new(),
            next_offset: 0,
            has_more: false,
            is_loading_more: false,
        }
    }

    /// Applies a (possibly new) filter and loads the first page.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures; the pager state is reset
    /// either way so a retry starts clean.
    pub async fn query(&mut self, filter: HistoryFilter) -> Result<&[Session], StorageError> {
        self.filter = filter;
        self.items.clear();
        self.next_offset = 0;
        self.has_more = false;

        let page = self.fetch_page().await?;
        self.items = page;
        Ok(&self.items)
    }

    /// Loads the next page, appending to `items`.
    ///
    /// Returns `Ok(false)` without touching storage when a load is already
    /// in flight or there is nothing more to load.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failures.
    pub async fn load_more(&mut self) -> Result<bool, StorageError> {
        if self.is_loading_more || !self.has_more {
            debug!("load_more ignored: nothing to do");
            return Ok(false);
        }

        self.is_loading_more = true;
        let result = self.fetch_page().await;
        self.is_loading_more = false;

        let page = result?;
        self.items.extend(page);
        Ok(true)
    }

    async fn fetch_page(&mut self) -> Result<Vec<Session>, StorageError> {
        // Over-fetch by one to learn whether another page exists.
        let mut page = self
            .store
            .list_page(&self.filter, self.next_offset, self.page_size + 1)
            .await?;
        self.has_more = page.len() > self.page_size as usize;
        page.truncate(self.page_size as usize);
        self.next_offset += u32::try_from(page.len()).unwrap_or(self.page_size);
        Ok(page)
    }

    #[must_use]
    pub fn items(&self) -> &[Session] {
        &self.items
    }

    #[must_use]
    pub fn filter(&self) -> &HistoryFilter {
        &self.filter
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn is_loading_more(&self) -> bool {
        self.is_loading_more
    }
}

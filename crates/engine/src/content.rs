//! Content supply: remote catalogue with write-through offline cache.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rng;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parrot_core::model::{ContentItem, ItemId, SessionConfig, TagId};
use storage::repository::ContentCache;

use crate::error::ContentError;

/// Yields a bounded list of practice items matching the session filters.
#[async_trait]
pub trait ContentSupplier: Send + Sync {
    /// Up to `config.item_count()` random items matching level, kind, and
    /// every tag in the config.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::Unavailable` when nothing matches, or
    /// transport/storage errors.
    async fn random_items(&self, config: &SessionConfig)
        -> Result<Vec<ContentItem>, ContentError>;
}

#[derive(Clone, Debug)]
pub struct ContentConfig {
    pub base_url: String,
}

impl ContentConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("PARROT_CONTENT_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self { base_url })
    }
}

/// Remote catalogue client.
#[derive(Clone)]
pub struct RemoteContentSupplier {
    client: Client,
    config: Option<ContentConfig>,
}

impl RemoteContentSupplier {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(ContentConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<ContentConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ContentSupplier for RemoteContentSupplier {
    async fn random_items(
        &self,
        config: &SessionConfig,
    ) -> Result<Vec<ContentItem>, ContentError> {
        let remote = self.config.as_ref().ok_or(ContentError::Disabled)?;

        let url = format!("{}/v1/items/random", remote.base_url.trim_end_matches('/'));
        let payload = RandomItemsRequest {
            level: config.level().as_str(),
            kind: config.kind().as_str(),
            tag_ids: config.tag_ids().iter().map(ToString::to_string).collect(),
            limit: config.item_count(),
        };

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status()));
        }

        let body: RandomItemsResponse = response.json().await?;
        let mut items = Vec::with_capacity(body.items.len());
        for payload in body.items {
            items.push(payload.into_item()?);
        }
        Ok(items)
    }
}

/// Remote supplier with an offline fallback.
///
/// Remote hits refresh the local cache; any remote failure (or an empty
/// remote result) falls back to filtering the cache with the same
/// semantics, shuffled and truncated to the requested count.
pub struct CachingContentSupplier {
    remote: Arc<dyn ContentSupplier>,
    cache: Arc<dyn ContentCache>,
}

impl CachingContentSupplier {
    #[must_use]
    pub fn new(remote: Arc<dyn ContentSupplier>, cache: Arc<dyn ContentCache>) -> Self {
        Self { remote, cache }
    }

    async fn from_cache(
        &self,
        config: &SessionConfig,
    ) -> Result<Vec<ContentItem>, ContentError> {
        let mut items = self
            .cache
            .matching_items(config.level(), config.kind(), config.tag_ids())
            .await?;
        if items.is_empty() {
            return Err(ContentError::Unavailable);
        }
        let mut rng = rng();
        items.as_mut_slice().shuffle(&mut rng);
        items.truncate(config.item_count() as usize);
        Ok(items)
    }
}

#[async_trait]
impl ContentSupplier for CachingContentSupplier {
    async fn random_items(
        &self,
        config: &SessionConfig,
    ) -> Result<Vec<ContentItem>, ContentError> {
        match self.remote.random_items(config).await {
            Ok(mut items) if !items.is_empty() => {
                if let Err(err) = self.cache.store_items(&items).await {
                    warn!(%err, "failed to refresh content cache");
                }
                items.truncate(config.item_count() as usize);
                Ok(items)
            }
            Ok(_) => {
                debug!("remote returned no items, trying cache");
                self.from_cache(config).await
            }
            Err(ContentError::Unavailable) => self.from_cache(config).await,
            Err(err) => {
                warn!(%err, "content service unreachable, trying cache");
                self.from_cache(config).await
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct RandomItemsRequest {
    level: &'static str,
    kind: &'static str,
    tag_ids: Vec<String>,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct RandomItemsResponse {
    items: Vec<ItemPayload>,
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    id: ItemId,
    text: String,
    audio_url: String,
    level: String,
    kind: String,
    #[serde(default)]
    tag_ids: Vec<TagId>,
}

impl ItemPayload {
    fn into_item(self) -> Result<ContentItem, ContentError> {
        let level = self
            .level
            .parse()
            .map_err(|_| ContentError::Unavailable)?;
        let kind = self.kind.parse().map_err(|_| ContentError::Unavailable)?;
        ContentItem::new(self.id, self.text, self.audio_url, level, kind, self.tag_ids)
            .map_err(|_| ContentError::Unavailable)
    }
}

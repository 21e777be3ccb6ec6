//! Assembles the engine's services around injected device and network ports.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use parrot_core::model::{Session, SessionConfig, SessionId};
use parrot_core::Clock;
use storage::repository::{SessionStore, Storage};
use storage::sqlite::SqliteInitError;

use crate::capture::{AudioInput, CaptureCoordinator};
use crate::content::{CachingContentSupplier, ContentSupplier, RemoteContentSupplier};
use crate::error::{ContentError, EngineError};
use crate::gateway::{
    HttpSessionApi, PersistenceGateway, RemoteSessionApi, RetryPolicy, SyncReport,
};
use crate::history::HistoryQueryEngine;
use crate::playback::{AudioOutput, PlaybackCoordinator};
use crate::scoring::{HttpScoringClient, ScoringClient, DEFAULT_LANGUAGE};
use crate::session::{SessionHandle, SessionRunner};

/// Errors emitted while bootstrapping the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineInitError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}

/// Front door of the practice engine.
///
/// Owns the storage ports, the audio coordinators, and the remote clients,
/// and hands out one session at a time plus history and sync entry points.
/// This is a library surface: the host app injects the platform devices and
/// subscribes to state.
#[derive(Clone)]
pub struct PracticeEngine {
    clock: Clock,
    sessions: Arc<dyn SessionStore>,
    supplier: Arc<dyn ContentSupplier>,
    playback: PlaybackCoordinator,
    capture: CaptureCoordinator,
    scoring: Arc<dyn ScoringClient>,
    remote_sessions: Arc<dyn RemoteSessionApi>,
    gateway: PersistenceGateway,
    language: String,
}

impl PracticeEngine {
    /// Wires the engine from explicit ports.
    #[must_use]
    pub fn new(
        clock: Clock,
        storage: &Storage,
        output: Arc<dyn AudioOutput>,
        input: Arc<dyn AudioInput>,
        scoring: Arc<dyn ScoringClient>,
        remote_sessions: Arc<dyn RemoteSessionApi>,
        remote_content: Arc<dyn ContentSupplier>,
    ) -> Self {
        let supplier = Arc::new(CachingContentSupplier::new(
            remote_content,
            Arc::clone(&storage.content),
        ));
        let gateway = PersistenceGateway::new(
            Arc::clone(&storage.sessions),
            Arc::clone(&remote_sessions),
            RetryPolicy::default_backoff(),
        );
        Self {
            clock,
            sessions: Arc::clone(&storage.sessions),
            supplier,
            playback: PlaybackCoordinator::new(output),
            capture: CaptureCoordinator::new(input),
            scoring,
            remote_sessions,
            gateway,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Builds the engine over `SQLite` storage with env-configured HTTP
    /// clients for content, scoring, and sync.
    ///
    /// # Errors
    ///
    /// Returns `EngineInitError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        output: Arc<dyn AudioOutput>,
        input: Arc<dyn AudioInput>,
    ) -> Result<Self, EngineInitError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(
            clock,
            &storage,
            output,
            input,
            Arc::new(HttpScoringClient::from_env()),
            Arc::new(HttpSessionApi::from_env()),
            Arc::new(RemoteContentSupplier::from_env()),
        ))
    }

    /// Overrides the remote-sync retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.gateway = PersistenceGateway::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.remote_sessions),
            retry,
        );
        self
    }

    /// Overrides the language code sent to the scoring service.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Starts a session: fetches content, snapshots the config, and returns
    /// the handle plus the runner for the caller to spawn.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::Unavailable` (wrapped) when neither the remote
    /// catalogue nor the cache matches the filters; no session object is
    /// created in that case.
    pub async fn start_session(
        &self,
        config: SessionConfig,
    ) -> Result<(SessionHandle, SessionRunner), EngineError> {
        let items = self.supplier.random_items(&config).await?;
        if items.is_empty() {
            return Err(ContentError::Unavailable.into());
        }

        let total_items = u32::try_from(items.len()).unwrap_or(config.item_count());
        let session = Session::new(
            SessionId::generate(),
            config,
            total_items,
            self.clock.now(),
        );
        info!(session_id = %session.id(), total_items, "session created");

        Ok(SessionRunner::new(
            session,
            items,
            self.playback.clone(),
            self.capture.clone(),
            Arc::clone(&self.scoring),
            self.gateway.clone(),
            self.clock,
            self.language.clone(),
        ))
    }

    /// A fresh history pager over the local store.
    #[must_use]
    pub fn history(&self, page_size: u32) -> HistoryQueryEngine {
        HistoryQueryEngine::new(Arc::clone(&self.sessions), page_size)
    }

    /// Sweeps every locally-pending/failed session to the remote store.
    pub async fn sync_all_pending(&self) -> SyncReport {
        self.gateway.sync_all_pending().await
    }

    /// The persistence gateway, for hosts that drive sync themselves.
    #[must_use]
    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }
}

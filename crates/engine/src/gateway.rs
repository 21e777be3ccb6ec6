//! Durable local save plus best-effort, retryable remote sync.

use std::collections::HashSet;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use parrot_core::model::{Session, SessionId, SyncStatus};
use storage::repository::{SessionStore, StorageError};

use crate::error::SyncError;

/// Remote store for completed sessions.
///
/// Submissions reuse the client-generated session id, so the remote side
/// can deduplicate retries.
#[async_trait]
pub trait RemoteSessionApi: Send + Sync {
    /// Submits one completed session, returning the remote identifier.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` on rejection or transport failure.
    async fn submit_session(&self, session: &Session) -> Result<String, SyncError>;
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub base_url: String,
    pub api_key: String,
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("PARROT_SYNC_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url =
            env::var("PARROT_SYNC_URL").unwrap_or_else(|_| "https://api.parrot.app".into());
        Some(Self { base_url, api_key })
    }
}

/// HTTP remote session store.
#[derive(Clone)]
pub struct HttpSessionApi {
    client: Client,
    config: Option<SyncConfig>,
}

impl HttpSessionApi {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(SyncConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<SyncConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl RemoteSessionApi for HttpSessionApi {
    async fn submit_session(&self, session: &Session) -> Result<String, SyncError> {
        let config = self.config.as_ref().ok_or(SyncError::Disabled)?;

        let url = format!("{}/v1/sessions", config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(session)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status()));
        }

        let body: SubmitResponse = response.json().await?;
        Ok(body.remote_id)
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    remote_id: String,
}

/// Backoff schedule for one sync attempt run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Bounded exponential backoff: 1s, 2s, capped at 60s, three tries.
    #[must_use]
    pub fn default_backoff() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// A single attempt with no delay, for tests.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome counts of one `sync_all_pending` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Coordinates the mandatory local save with best-effort remote sync.
///
/// The local save is the durability line: completion is never reported
/// before it returns, and its failure is the only fatal error class.
/// Remote sync happens after, never blocks, and never reverses the save.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn SessionStore>,
    remote: Arc<dyn RemoteSessionApi>,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<SessionId>>>,
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        remote: Arc<dyn RemoteSessionApi>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            retry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Durably saves a completed session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` when the save fails; callers must treat this
    /// as terminal, since losing a finished session is unacceptable.
    pub async fn save_local(&self, session: &Session) -> Result<(), StorageError> {
        self.store.save_session(session).await?;
        info!(session_id = %session.id(), "session saved locally");
        Ok(())
    }

    /// Attempts one remote submission for a locally-saved session.
    ///
    /// Marks the session `synced` on success and `failed` otherwise; either
    /// way the local copy stays intact. At most one attempt per session id
    /// is in flight at a time; a concurrent call is a no-op reporting
    /// `Syncing`.
    pub async fn try_sync_remote(&self, id: SessionId) -> SyncStatus {
        if !self.claim(id) {
            return SyncStatus::Syncing;
        }
        let status = self.sync_one(id).await;
        self.release(id);
        status
    }

    /// Sweeps every locally-pending/failed session, sequentially.
    ///
    /// Individual failures are isolated: the sweep always continues to the
    /// next session. A second run after full success issues zero remote
    /// calls because nothing is listed as unsynced anymore.
    pub async fn sync_all_pending(&self) -> SyncReport {
        let ids = match self.store.list_unsynced().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "could not list unsynced sessions");
                return SyncReport::default();
            }
        };

        let mut report = SyncReport::default();
        for id in ids {
            if !self.claim(id) {
                report.skipped += 1;
                continue;
            }
            match self.sync_one(id).await {
                SyncStatus::Synced => report.synced += 1,
                SyncStatus::Failed => report.failed += 1,
                _ => report.skipped += 1,
            }
            self.release(id);
        }
        report
    }

    fn claim(&self, id: SessionId) -> bool {
        match self.in_flight.lock() {
            Ok(mut guard) => guard.insert(id),
            Err(_) => false,
        }
    }

    fn release(&self, id: SessionId) {
        if let Ok(mut guard) = self.in_flight.lock() {
            guard.remove(&id);
        }
    }

    async fn sync_one(&self, id: SessionId) -> SyncStatus {
        let session = match self.store.get_session(id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(session_id = %id, "session vanished before sync");
                return SyncStatus::Failed;
            }
            Err(err) => {
                warn!(session_id = %id, %err, "could not load session for sync");
                return SyncStatus::Failed;
            }
        };

        match session.sync_status() {
            SyncStatus::Synced => return SyncStatus::Synced,
            SyncStatus::Failed => {
                // Re-enter the cycle through `pending` before `syncing`.
                if self.mark(id, SyncStatus::Pending).await.is_err() {
                    return SyncStatus::Failed;
                }
            }
            SyncStatus::Pending | SyncStatus::Syncing => {}
        }
        if self.mark(id, SyncStatus::Syncing).await.is_err() {
            return SyncStatus::Failed;
        }

        for attempt in 1..=self.retry.max_attempts {
            match self.remote.submit_session(&session).await {
                Ok(remote_id) => {
                    info!(session_id = %id, remote_id, "session synced");
                    let _ = self.mark(id, SyncStatus::Synced).await;
                    return SyncStatus::Synced;
                }
                Err(err) => {
                    warn!(session_id = %id, attempt, %err, "remote submission failed");
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_before(attempt)).await;
                    }
                }
            }
        }

        let _ = self.mark(id, SyncStatus::Failed).await;
        SyncStatus::Failed
    }

    async fn mark(&self, id: SessionId, status: SyncStatus) -> Result<(), StorageError> {
        self.store.update_sync_status(id, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use parrot_core::model::{
        ItemId, ItemKind, Level, ResultEntry, SessionConfig, SessionMode, TagId, UserResponse,
    };
    use parrot_core::time::fixed_now;
    use std::sync::atomic::{AtomicU32, Ordering};
    use storage::repository::InMemoryRepository;
    use uuid::Uuid;

    struct CountingRemote {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingRemote {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl RemoteSessionApi for CountingRemote {
        async fn submit_session(&self, session: &Session) -> Result<String, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SyncError::HttpStatus(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ))
            } else {
                Ok(session.id().to_string())
            }
        }
    }

    fn completed_session() -> Session {
        let config = SessionConfig::new(
            SessionMode::ListenOnly,
            Level::A1,
            ItemKind::Question,
            vec![TagId::new(Uuid::new_v4())],
            5,
        )
        .unwrap();
        let mut session = Session::new(SessionId::generate(), config, 1, fixed_now());
        session
            .push_result(
                ResultEntry::new(
                    ItemId::new(Uuid::new_v4()),
                    1,
                    UserResponse::Correct,
                    None,
                    400,
                )
                .unwrap(),
            )
            .unwrap();
        session
            .finalize(fixed_now() + ChronoDuration::seconds(20))
            .unwrap();
        session
    }

    fn gateway(
        store: &Arc<InMemoryRepository>,
        remote: Arc<CountingRemote>,
    ) -> PersistenceGateway {
        PersistenceGateway::new(
            Arc::clone(store) as Arc<dyn SessionStore>,
            remote,
            RetryPolicy::none(),
        )
    }

    #[tokio::test]
    async fn failed_submission_keeps_session_locally() {
        let store = Arc::new(InMemoryRepository::new());
        let remote = Arc::new(CountingRemote::new(true));
        let gateway = gateway(&store, Arc::clone(&remote));

        let session = completed_session();
        gateway.save_local(&session).await.unwrap();

        let status = gateway.try_sync_remote(session.id()).await;
        assert_eq!(status, SyncStatus::Failed);

        let stored = store.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.sync_status(), SyncStatus::Failed);
        assert_eq!(stored.results(), session.results());
    }

    #[tokio::test]
    async fn sweep_is_idempotent_after_full_success() {
        let store = Arc::new(InMemoryRepository::new());
        let remote = Arc::new(CountingRemote::new(false));
        let gateway = gateway(&store, Arc::clone(&remote));

        for _ in 0..3 {
            gateway.save_local(&completed_session()).await.unwrap();
        }

        let first = gateway.sync_all_pending().await;
        assert_eq!(first.synced, 3);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);

        let second = gateway.sync_all_pending().await;
        assert_eq!(second, SyncReport::default());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_sessions_are_retried_by_next_sweep() {
        let store = Arc::new(InMemoryRepository::new());
        let failing = Arc::new(CountingRemote::new(true));
        let gateway_fail = gateway(&store, failing);

        let session = completed_session();
        gateway_fail.save_local(&session).await.unwrap();
        let report = gateway_fail.sync_all_pending().await;
        assert_eq!(report.failed, 1);

        let working = Arc::new(CountingRemote::new(false));
        let gateway_ok = gateway(&store, working);
        let report = gateway_ok.sync_all_pending().await;
        assert_eq!(report.synced, 1);

        let stored = store.get_session(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn concurrent_sync_for_same_id_is_single_flight() {
        let store = Arc::new(InMemoryRepository::new());
        let remote = Arc::new(CountingRemote::new(false));
        let gateway = gateway(&store, Arc::clone(&remote));

        let session = completed_session();
        gateway.save_local(&session).await.unwrap();

        assert!(gateway.claim(session.id()));
        // Second claim while the first is "in flight" is refused.
        let status = gateway.try_sync_remote(session.id()).await;
        assert_eq!(status, SyncStatus::Syncing);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        gateway.release(session.id());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        assert_eq!(policy.delay_before(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(4), Duration::from_secs(4));
    }
}

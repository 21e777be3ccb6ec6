use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::aggregate::SessionTotals;
use crate::model::config::SessionConfig;
use crate::model::ids::SessionId;
use crate::model::result::ResultEntry;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session is already complete")]
    AlreadyComplete,

    #[error("session is not complete yet")]
    NotComplete,

    #[error("expected sequence number {expected}, got {got}")]
    SequenceMismatch { expected: u32, got: u32 },

    #[error("session holds {total} items, cannot append more results")]
    TooManyResults { total: u32 },

    #[error("pronunciation score recorded in a mode without scoring")]
    ScoreInScorelessMode,

    #[error("completed_at is before started_at")]
    InvalidTimeRange,

    #[error("invalid sync transition: {from} -> {to}")]
    InvalidSyncTransition { from: SyncStatus, to: SyncStatus },

    #[error("unknown sync status: {0}")]
    UnknownSyncStatus(String),
}

/// Whether a locally-saved session has been mirrored to the remote store.
///
/// `pending → syncing → synced` on the happy path; a failed attempt lands on
/// `failed` and re-enters the cycle via `pending` on retry. This is the only
/// session field that changes after the local save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    /// Storage/wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    /// True if `next` is a legal transition from this status.
    #[must_use]
    pub fn can_become(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Syncing)
                | (SyncStatus::Syncing, SyncStatus::Synced | SyncStatus::Failed)
                | (SyncStatus::Failed, SyncStatus::Pending)
        )
    }

    /// True once the session no longer needs a sync attempt.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, SyncStatus::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(SessionError::UnknownSyncStatus(other.to_string())),
        }
    }
}

/// One practice session: config snapshot, append-only results, and the
/// summary computed at completion.
///
/// Created in memory at session start, mutated only by appended results,
/// finalized exactly once, then persisted. After the local save the sole
/// mutable field is `sync_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    results: Vec<ResultEntry>,
    total_items: u32,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    sync_status: SyncStatus,
    totals: Option<SessionTotals>,
}

impl Session {
    /// Starts a new in-memory session over `total_items` planned items.
    ///
    /// A session planned over zero items is terminal from the start: it is
    /// immediately complete with empty totals.
    #[must_use]
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        total_items: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let (completed_at, totals) = if total_items == 0 {
            (
                Some(started_at),
                Some(SessionTotals::from_results(&[], started_at, started_at)),
            )
        } else {
            (None, None)
        };
        Self {
            id,
            config,
            results: Vec::new(),
            total_items,
            started_at,
            completed_at,
            sync_status: SyncStatus::Pending,
            totals,
        }
    }

    /// Rehydrates a completed session from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if sequence numbers are not exactly
    /// `1..=results.len()`, results outnumber `total_items`, or the
    /// completion time precedes the start time.
    pub fn from_persisted(
        id: SessionId,
        config: SessionConfig,
        results: Vec<ResultEntry>,
        total_items: u32,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        sync_status: SyncStatus,
    ) -> Result<Self, SessionError> {
        if completed_at < started_at {
            return Err(SessionError::InvalidTimeRange);
        }
        if results.len() > total_items as usize {
            return Err(SessionError::TooManyResults { total: total_items });
        }
        for (index, entry) in results.iter().enumerate() {
            let expected = u32::try_from(index + 1)
                .map_err(|_| SessionError::TooManyResults { total: total_items })?;
            if entry.sequence_number() != expected {
                return Err(SessionError::SequenceMismatch {
                    expected,
                    got: entry.sequence_number(),
                });
            }
        }

        let totals = SessionTotals::from_results(&results, started_at, completed_at);
        Ok(Self {
            id,
            config,
            results,
            total_items,
            started_at,
            completed_at: Some(completed_at),
            sync_status,
            totals: Some(totals),
        })
    }

    /// Appends the result for the next item.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyComplete` after finalization,
    /// `SessionError::SequenceMismatch` when the entry's sequence number is
    /// not the next in line, `SessionError::TooManyResults` past
    /// `total_items`, and `SessionError::ScoreInScorelessMode` when a score
    /// arrives in a mode that cannot produce one.
    pub fn push_result(&mut self, entry: ResultEntry) -> Result<(), SessionError> {
        if self.is_complete() {
            return Err(SessionError::AlreadyComplete);
        }
        if self.results.len() as u32 >= self.total_items {
            return Err(SessionError::TooManyResults {
                total: self.total_items,
            });
        }
        let expected = self.results.len() as u32 + 1;
        if entry.sequence_number() != expected {
            return Err(SessionError::SequenceMismatch {
                expected,
                got: entry.sequence_number(),
            });
        }
        if entry.score().is_some() && !self.config.mode().scores_pronunciation() {
            return Err(SessionError::ScoreInScorelessMode);
        }
        self.results.push(entry);
        Ok(())
    }

    /// Finalizes the session: stamps the completion time and computes totals.
    ///
    /// Called exactly once, at natural completion or quit.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyComplete` on a second call and
    /// `SessionError::InvalidTimeRange` if `completed_at` precedes the start.
    pub fn finalize(&mut self, completed_at: DateTime<Utc>) -> Result<&SessionTotals, SessionError> {
        if self.is_complete() {
            return Err(SessionError::AlreadyComplete);
        }
        if completed_at < self.started_at {
            return Err(SessionError::InvalidTimeRange);
        }
        self.completed_at = Some(completed_at);
        let totals = SessionTotals::from_results(&self.results, self.started_at, completed_at);
        Ok(self.totals.insert(totals))
    }

    /// Moves the sync status along its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidSyncTransition` for a move the
    /// `pending → syncing → synced | failed → pending` cycle does not allow.
    pub fn set_sync_status(&mut self, next: SyncStatus) -> Result<(), SessionError> {
        if !self.sync_status.can_become(next) {
            return Err(SessionError::InvalidSyncTransition {
                from: self.sync_status,
                to: next,
            });
        }
        self.sync_status = next;
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn results(&self) -> &[ResultEntry] {
        &self.results
    }

    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.total_items
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    #[must_use]
    pub fn totals(&self) -> Option<&SessionTotals> {
        self.totals.as_ref()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Number of items answered so far.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.results.len()
    }
}

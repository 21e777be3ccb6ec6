//! Shared error types for the engine crate.

use thiserror::Error;

use parrot_core::model::{ResultError, SessionError};
use storage::repository::StorageError;

/// Errors from the content supplier.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContentError {
    /// Neither the remote catalogue nor the offline cache matched the
    /// requested filters. Surfaced before any session object exists.
    #[error("no content matches the requested filters")]
    Unavailable,

    #[error("content service is not configured")]
    Disabled,

    #[error("content request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the audio output device.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio source unreadable: {0}")]
    SourceUnreadable(String),
}

/// Errors from microphone capture.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("microphone access denied")]
    PermissionDenied,

    #[error("capture too short: {got_ms}ms < {min_ms}ms")]
    TooShort { got_ms: u64, min_ms: u64 },

    #[error("capture device failed: {0}")]
    Device(String),
}

/// Errors from the pronunciation scoring service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScoringError {
    #[error("scoring request timed out")]
    Timeout,

    #[error("scoring service unavailable")]
    ServiceUnavailable,

    #[error("audio quality too low to assess")]
    AudioQuality,

    #[error("scoring service is not configured")]
    Disabled,

    #[error("scoring request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors from remote session submission.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("sync service is not configured")]
    Disabled,

    #[error("session submission rejected with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

/// Terminal errors a session run can end with.
///
/// Per-phase playback/capture/scoring trouble never lands here; those
/// degrade the affected item and the session continues. The only fatal
/// class after a session exists is losing the local save.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Content(#[from] ContentError),

    /// The local save of a finished session failed. Fatal: this is the one
    /// error class a caller must surface as terminal.
    #[error("failed to save completed session: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Result(#[from] ResultError),
}

#![forbid(unsafe_code)]

pub mod app;
pub mod capture;
pub mod content;
pub mod error;
pub mod gateway;
pub mod history;
pub mod playback;
pub mod scoring;
pub mod session;

pub use parrot_core::Clock;

pub use app::{EngineInitError, PracticeEngine};
pub use capture::{AudioInput, CaptureCoordinator, CapturedAudio};
pub use content::{CachingContentSupplier, ContentSupplier, RemoteContentSupplier};
pub use error::{
    CaptureError, ContentError, EngineError, PlaybackError, ScoringError, SyncError,
};
pub use gateway::{
    HttpSessionApi, PersistenceGateway, RemoteSessionApi, RetryPolicy, SyncReport,
};
pub use history::HistoryQueryEngine;
pub use playback::{AudioOutput, PlaybackCoordinator, PlaybackEnd};
pub use scoring::{HttpScoringClient, ScoringClient};
pub use session::{EngineState, SessionHandle, SessionRunner};

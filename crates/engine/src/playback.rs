//! Audio output port and the coordinator the session runner drives.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::PlaybackError;

/// How a playback operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The source played to its end.
    Finished,
    /// [`AudioOutput::stop`] was called; `offset_ms` is the position reached.
    Stopped { offset_ms: u64 },
    /// Another process claimed the audio output. The session runner treats
    /// this as an implicit pause at `offset_ms`.
    Interrupted { offset_ms: u64 },
}

/// Platform audio output device, injected by the host app.
///
/// Exactly one playback is active at a time; the engine never issues a
/// second `play` before the first resolved or was stopped.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Plays `source` starting at `offset_ms`, resolving once playback ends.
    ///
    /// Dropping the returned future must not stop the device; only
    /// [`AudioOutput::stop`] does. This lets the engine abandon its await,
    /// then stop and read the offset deterministically.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError` when the device or the source is unusable.
    async fn play(&self, source: &Url, offset_ms: u64) -> Result<PlaybackEnd, PlaybackError>;

    /// Stops the active playback (a real stop, not a mute) and returns the
    /// offset reached, in milliseconds. A no-op returning 0 when idle.
    async fn stop(&self) -> u64;
}

/// Thin, cloneable front over the output device.
///
/// Single plays only: repeated listen-only playback is composed by the
/// phase table (play, gap, play), not by the coordinator.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    output: Arc<dyn AudioOutput>,
}

impl PlaybackCoordinator {
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }

    /// Starts one playback from `offset_ms`.
    ///
    /// Returns an owned future so the runner can `select!` it against the
    /// command channel and drop it on preemption without borrowing `self`.
    pub fn play_once(
        &self,
        source: Url,
        offset_ms: u64,
    ) -> impl Future<Output = Result<PlaybackEnd, PlaybackError>> + Send + 'static {
        let output = Arc::clone(&self.output);
        async move { output.play(&source, offset_ms).await }
    }

    /// Stops the device and reports the offset reached.
    pub async fn stop(&self) -> u64 {
        self.output.stop().await
    }
}

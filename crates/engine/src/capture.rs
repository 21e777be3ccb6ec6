//! Microphone port and the memory-bounded capture coordinator.
//!
//! Captured audio exists only in memory: it is handed to the scoring client
//! and dropped, or discarded outright on pause/quit. Nothing is ever written
//! to persistent storage.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::CaptureError;

/// Hard ceiling on the in-memory capture buffer.
pub const CAPTURE_BUFFER_CAP: usize = 10 * 1024 * 1024;

/// Shortest capture the scoring service can assess.
pub const MIN_CAPTURE_MS: u64 = 300;

/// Longest capture before the coordinator stops on its own.
pub const MAX_CAPTURE_MS: u64 = 30_000;

/// Expected input format: 16 kHz mono, 16-bit PCM.
pub const BYTES_PER_MS: usize = 32;

/// Platform microphone device, injected by the host app.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Starts capturing and returns the PCM chunk stream (16 kHz mono s16le).
    /// The stream closes after [`AudioInput::end`] or on device failure.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::PermissionDenied` when microphone access is
    /// unavailable, or `CaptureError::Device` for hardware failures.
    async fn begin(&self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError>;

    /// Stops the device. Idempotent.
    async fn end(&self);
}

/// A finished capture: raw PCM plus what happened to it on the way in.
#[derive(Debug)]
pub struct CapturedAudio {
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
    /// True when the buffer ceiling forced truncation; the kept prefix is
    /// still scoreable, so this is a warning rather than an error.
    pub truncated: bool,
}

/// Thin, cloneable front over the input device.
#[derive(Clone)]
pub struct CaptureCoordinator {
    input: Arc<dyn AudioInput>,
}

impl CaptureCoordinator {
    #[must_use]
    pub fn new(input: Arc<dyn AudioInput>) -> Self {
        Self { input }
    }

    /// Starts the microphone and returns the accumulating capture.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::PermissionDenied` or `CaptureError::Device`
    /// straight from the device port.
    pub async fn begin(&self) -> Result<ActiveCapture, CaptureError> {
        let chunks = self.input.begin().await?;
        Ok(ActiveCapture {
            input: Arc::clone(&self.input),
            chunks,
            buffer: Vec::new(),
            truncated: false,
        })
    }
}

/// An in-progress capture owning the bounded buffer.
pub struct ActiveCapture {
    input: Arc<dyn AudioInput>,
    chunks: mpsc::Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    truncated: bool,
}

impl std::fmt::Debug for ActiveCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCapture")
            .field("buffer_len", &self.buffer.len())
            .field("truncated", &self.truncated)
            .finish_non_exhaustive()
    }
}

impl ActiveCapture {
    /// Receives and buffers the next chunk.
    ///
    /// Returns `None` when the device closed the stream or the buffer
    /// ceiling was hit (the excess is dropped and `truncated` set).
    pub async fn next_chunk(&mut self) -> Option<usize> {
        let chunk = self.chunks.recv().await?;
        let room = CAPTURE_BUFFER_CAP.saturating_sub(self.buffer.len());
        if chunk.len() > room {
            self.buffer.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            warn!(
                cap_bytes = CAPTURE_BUFFER_CAP,
                "capture buffer full, truncating"
            );
            return None;
        }
        self.buffer.extend_from_slice(&chunk);
        Some(chunk.len())
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Duration buffered so far, from the PCM byte count.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        (self.buffer.len() / BYTES_PER_MS) as u64
    }

    /// Stops the device and hands back the buffered audio.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::TooShort` when less than [`MIN_CAPTURE_MS`]
    /// of audio arrived.
    pub async fn finish(mut self) -> Result<CapturedAudio, CaptureError> {
        self.input.end().await;
        self.chunks.close();
        let duration_ms = self.duration_ms();
        if duration_ms < MIN_CAPTURE_MS {
            return Err(CaptureError::TooShort {
                got_ms: duration_ms,
                min_ms: MIN_CAPTURE_MS,
            });
        }
        Ok(CapturedAudio {
            bytes: self.buffer,
            duration_ms,
            truncated: self.truncated,
        })
    }

    /// Stops the device and drops the partial buffer. Used on pause and
    /// quit; a paused capture is never resumed, only restarted.
    pub async fn discard(mut self) {
        self.input.end().await;
        self.chunks.close();
        self.buffer.clear();
    }
}

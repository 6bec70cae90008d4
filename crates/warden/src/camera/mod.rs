//! Camera resource management.
//!
//! The capture device sits behind a trait seam so the engine can run
//! against real hardware integrations, the file-backed device, or the
//! test fakes. The `Camera` wrapper owns at most one live stream and is
//! the only place a stream is acquired or released.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use facegate_common::GateError;

mod file;

pub use file::FileCaptureDevice;

/// A source of live capture streams (the camera permission layer).
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Request a live stream from the underlying device. Exactly one
    /// user-facing permission prompt per call; denial or hardware absence
    /// fails with [`GateError::CameraUnavailable`].
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, GateError>;
}

/// One live capture stream delivering encoded chunks.
#[async_trait]
pub trait CaptureStream: Send {
    /// Next encoded chunk from the feed. `None` means the stream was lost
    /// (device unplugged, permission revoked).
    async fn next_chunk(&mut self) -> Option<Bytes>;

    /// Stop all underlying tracks. Idempotent.
    fn stop(&mut self);
}

/// Exclusive owner of at most one live capture stream.
pub struct Camera {
    device: Arc<dyn CaptureDevice>,
    stream: Option<Box<dyn CaptureStream>>,
}

impl Camera {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            stream: None,
        }
    }

    /// Acquire the device only when no stream is held. Re-entrant on a
    /// live stream so the feed survives phase changes without a second
    /// permission prompt.
    pub async fn ensure_acquired(&mut self) -> Result<(), GateError> {
        if self.stream.is_none() {
            self.stream = Some(self.device.acquire().await?);
            tracing::debug!("camera acquired");
        }
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_mut(&mut self) -> Option<&mut (dyn CaptureStream + '_)> {
        self.stream.as_deref_mut()
    }

    /// Stop and drop the held stream. Safe to call when nothing is held,
    /// or more than once.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("camera released");
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

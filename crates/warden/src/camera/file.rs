//! File-backed capture device.
//!
//! Streams a pre-recorded clip from disk in fixed-size chunks on a timer,
//! looping at end-of-file so the feed behaves like a continuous camera.
//! This is the backend the CLI driver records from, and doubles as the
//! reference implementation of the capture seam.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

use facegate_common::GateError;

use super::{CaptureDevice, CaptureStream};

pub struct FileCaptureDevice {
    path: PathBuf,
    chunk_bytes: usize,
    chunk_interval: Duration,
}

impl FileCaptureDevice {
    pub fn new(path: PathBuf, chunk_bytes: usize, chunk_interval: Duration) -> Self {
        Self {
            path,
            chunk_bytes: chunk_bytes.max(1),
            chunk_interval,
        }
    }
}

#[async_trait]
impl CaptureDevice for FileCaptureDevice {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, GateError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            GateError::CameraUnavailable(format!("{}: {e}", self.path.display()))
        })?;

        if data.is_empty() {
            return Err(GateError::CameraUnavailable(format!(
                "{}: clip is empty",
                self.path.display()
            )));
        }

        tracing::debug!(
            path = %self.path.display(),
            bytes = data.len(),
            "file capture stream opened"
        );

        Ok(Box::new(FileStream {
            data: Bytes::from(data),
            pos: 0,
            chunk_bytes: self.chunk_bytes,
            pace: self.chunk_interval,
            stopped: false,
        }))
    }
}

struct FileStream {
    data: Bytes,
    pos: usize,
    chunk_bytes: usize,
    pace: Duration,
    stopped: bool,
}

#[async_trait]
impl CaptureStream for FileStream {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.stopped {
            return None;
        }

        tokio::time::sleep(self.pace).await;

        // Loop the clip to simulate a feed that never runs dry
        if self.pos >= self.data.len() {
            self.pos = 0;
        }

        let end = (self.pos + self.chunk_bytes).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Some(chunk)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stream_from(data: &[u8], chunk_bytes: usize) -> Box<dyn CaptureStream> {
        let dir = std::env::temp_dir().join(format!(
            "warden-file-capture-{chunk_bytes}-{}",
            data.len()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("clip.webm");
        tokio::fs::write(&path, data).await.unwrap();

        FileCaptureDevice::new(path, chunk_bytes, Duration::from_millis(10))
            .acquire()
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_and_loops() {
        let mut stream = stream_from(b"abcdefgh", 3).await;

        assert_eq!(stream.next_chunk().await.unwrap().as_ref(), b"abc");
        assert_eq!(stream.next_chunk().await.unwrap().as_ref(), b"def");
        assert_eq!(stream.next_chunk().await.unwrap().as_ref(), b"gh");
        // Wrapped around to the start
        assert_eq!(stream.next_chunk().await.unwrap().as_ref(), b"abc");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_feed() {
        let mut stream = stream_from(b"abcdefgh", 4).await;
        assert!(stream.next_chunk().await.is_some());

        stream.stop();
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_camera_unavailable() {
        let device = FileCaptureDevice::new(
            PathBuf::from("/nonexistent/clip.webm"),
            1024,
            Duration::from_millis(10),
        );
        let err = device.acquire().await.err().unwrap();
        assert!(matches!(err, GateError::CameraUnavailable(_)));
    }
}

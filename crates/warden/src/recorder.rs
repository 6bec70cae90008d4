//! Bounded-duration clip recording.
//!
//! A recording accumulates encoded chunks from the live stream and
//! concatenates them into one clip on stop. The session drives exactly one
//! recorder at a time; the hard deadline lives here, the select loop that
//! enforces it lives in the session.

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use facegate_common::Clip;

pub struct TimedRecorder {
    buf: BytesMut,
    deadline: Instant,
    elapsed_ms: u64,
    elapsed_tx: watch::Sender<u64>,
    clip: Option<Clip>,
}

impl TimedRecorder {
    /// Arm a recording that must be force-stopped at `max_duration`.
    /// The elapsed counter restarts from 0.
    pub fn start(max_duration: Duration, elapsed_tx: watch::Sender<u64>) -> Self {
        elapsed_tx.send_replace(0);
        Self {
            buf: BytesMut::new(),
            deadline: Instant::now() + max_duration,
            elapsed_ms: 0,
            elapsed_tx,
            clip: None,
        }
    }

    /// Instant at which the recording is force-stopped
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Append a chunk from the live stream. Chunks arriving after stop
    /// are dropped.
    pub fn push_chunk(&mut self, chunk: Bytes) {
        if self.clip.is_none() {
            self.buf.extend_from_slice(&chunk);
        }
    }

    /// Advance the observable elapsed counter by one tick.
    pub fn tick(&mut self, tick: Duration) {
        if self.clip.is_none() {
            self.elapsed_ms += tick.as_millis() as u64;
            self.elapsed_tx.send_replace(self.elapsed_ms);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.clip.is_some()
    }

    /// Stop and return the clip. Stopping an already-stopped recorder is
    /// a no-op returning the previously produced clip, so a manual stop
    /// racing the deadline cannot submit a second clip.
    pub fn stop(&mut self) -> Clip {
        if let Some(clip) = &self.clip {
            return clip.clone();
        }

        let clip = Clip::new(self.buf.split().freeze());
        self.elapsed_ms = 0;
        self.elapsed_tx.send_replace(0);
        self.clip = Some(clip.clone());

        tracing::debug!(bytes = clip.len(), "recording stopped");
        clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (TimedRecorder, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(42);
        let rec = TimedRecorder::start(Duration::from_millis(3000), tx);
        (rec, rx)
    }

    #[tokio::test]
    async fn accumulates_chunks_in_order() {
        let (mut rec, _rx) = recorder();
        rec.push_chunk(Bytes::from_static(b"one"));
        rec.push_chunk(Bytes::from_static(b"two"));

        let clip = rec.stop();
        assert_eq!(clip.as_bytes(), b"onetwo");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut rec, rx) = recorder();
        rec.push_chunk(Bytes::from_static(b"data"));
        rec.tick(Duration::from_millis(100));

        let first = rec.stop();
        // A chunk after stop must not change the already-produced clip
        rec.push_chunk(Bytes::from_static(b"late"));
        rec.tick(Duration::from_millis(100));
        let second = rec.stop();

        assert_eq!(first, second);
        assert!(rec.is_stopped());
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test]
    async fn elapsed_counter_ticks_and_resets() {
        let (mut rec, rx) = recorder();
        // start() resets whatever the channel held before
        assert_eq!(*rx.borrow(), 0);

        rec.tick(Duration::from_millis(100));
        rec.tick(Duration::from_millis(100));
        assert_eq!(*rx.borrow(), 200);

        rec.stop();
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reflects_max_duration() {
        let before = Instant::now();
        let (rec, _rx) = recorder();
        assert_eq!(rec.deadline().duration_since(before), Duration::from_millis(3000));
    }
}

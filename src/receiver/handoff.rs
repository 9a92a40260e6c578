//! Worker handoff for slow frame consumers
//!
//! Frame callbacks must return quickly. `FrameHandoff` turns a slow consumer
//! (JPEG decoding, writing to disk) into a callback that only enqueues the
//! frame; a blocking worker thread drains the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::media::{Frame, FrameMetadata};

/// Bounded queue feeding a blocking worker
pub struct FrameHandoff {
    tx: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl FrameHandoff {
    /// Spawn a worker processing up to `capacity` queued frames
    pub fn spawn<F>(capacity: usize, mut worker: F) -> Self
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Frame>(capacity.max(1));

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(frame) = rx.blocking_recv() {
                worker(frame);
            }
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            worker,
        }
    }

    /// Callback to register on a [`FrameReceiver`](super::FrameReceiver)
    ///
    /// Frames that do not fit in the queue are dropped and counted.
    pub fn callback(&self) -> impl Fn(FrameMetadata, Bytes) + Send + Sync + 'static {
        let tx = self.tx.clone();
        let dropped = Arc::clone(&self.dropped);

        move |metadata, payload| {
            if tx.try_send(Frame::new(metadata, payload)).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Frames dropped because the worker fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the worker to drain the queue
    ///
    /// Every callback returned by [`callback`](Self::callback) must have been
    /// dropped (close the receiver first), otherwise this waits forever.
    pub async fn finish(self) -> u64 {
        let dropped = self.dropped();
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Frame worker failed");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::media::ScaleMode;
    use crate::registry::McamId;

    fn meta(sequence: u32) -> FrameMetadata {
        FrameMetadata {
            mcam_id: McamId(1),
            sequence,
            timestamp_us: 0,
            scale_mode: ScaleMode::Hd,
            width: 1920,
            height: 1080,
            exposure_us: 0,
            gain: 0.0,
        }
    }

    #[tokio::test]
    async fn test_worker_receives_frames_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let handoff = FrameHandoff::spawn(8, move |frame| {
            s.lock().unwrap().push(frame.metadata.sequence);
        });

        let callback = handoff.callback();
        for seq in 0..5 {
            callback(meta(seq), Bytes::from_static(b"x"));
        }
        drop(callback);

        assert_eq!(handoff.finish().await, 0);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let handoff = FrameHandoff::spawn(1, move |_| {
            let _ = release_rx.recv();
        });

        let callback = handoff.callback();
        for seq in 0..10 {
            callback(meta(seq), Bytes::new());
        }
        drop(callback);

        // At most one frame in the worker and one in the queue
        assert!(handoff.dropped() >= 8);

        drop(release_tx);
        handoff.finish().await;
    }
}

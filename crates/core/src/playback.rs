//! FIFO of synthesized audio waiting to be played.
//!
//! The router is the only producer; a playback task is the only consumer.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    frames: Mutex<VecDeque<Bytes>>,
    ready: Notify,
}

/// Cloneable handle to a shared playback queue.
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        // A panic while holding the lock cannot leave a VecDeque half-updated.
        self.inner
            .frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put(&self, audio: Bytes) {
        self.frames().push_back(audio);
        self.inner.ready.notify_one();
    }

    /// Takes the next frame without waiting.
    pub fn try_take(&self) -> Option<Bytes> {
        self.frames().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    /// Drops everything queued and returns how many frames were discarded.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames();
        let dropped = frames.len();
        frames.clear();
        dropped
    }

    /// Waits for the next frame.
    pub async fn next(&self) -> Bytes {
        loop {
            let notified = self.inner.ready.notified();
            if let Some(frame) = self.try_take() {
                return frame;
            }
            notified.await;
        }
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

use crate::audio::encoder::AudioFrame;

#[derive(Debug)]
struct QueueInner {
    frames: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Bounded single-consumer queue of outbound frames.
///
/// Capture never blocks: when the queue is full the oldest frame is discarded.
/// Frames that survive leave in capture order.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(QueueInner {
                frames: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Returns `false` if the queue is closed and the frame was discarded.
    pub fn push(&self, frame: AudioFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        {
            let mut frames = self.inner.frames.lock().unwrap_or_else(|e| e.into_inner());
            if frames.len() >= self.inner.capacity {
                frames.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    warn!("Outbound queue full, dropped {} frame(s) so far", dropped);
                }
            }
            frames.push_back(frame);
        }
        self.inner.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.inner.frames.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    /// Waits for the next frame. `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Stops accepting frames and discards what is queued.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.frames.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

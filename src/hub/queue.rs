//! Bounded per-session outbound queue.

use crate::types::VerificationResult;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// FIFO of results waiting to be written to one session.
///
/// Pushing never blocks: when the queue is full the oldest queued result is
/// dropped and counted. A single consumer awaits [`OutboundQueue::pop`].
#[derive(Debug)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<Arc<VerificationResult>>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` results (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueue a result, dropping the oldest one if full.
    ///
    /// Returns `false` if the queue is closed.
    pub fn push(&self, result: Arc<VerificationResult>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            items.push_back(result);
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next result.
    ///
    /// Returns `None` once the queue is closed and empty. Cancel safe.
    pub async fn pop(&self) -> Option<Arc<VerificationResult>> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next result without waiting.
    pub fn try_pop(&self) -> Option<Arc<VerificationResult>> {
        self.items.lock().pop_front()
    }

    /// Stop accepting results. Queued results can still be popped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether [`Self::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Results dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of queued results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Maximum number of queued results.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

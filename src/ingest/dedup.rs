//! Sliding-window request id deduplication.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Remembers request ids for a fixed window, bounded in count.
///
/// Ids are only ever probed with `contains`, so the LRU order is insertion
/// order and capacity eviction forgets the oldest id first.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    seen: LruCache<String, Instant>,
}

impl DedupWindow {
    /// Create a window remembering ids for `window`, at most `capacity` at once.
    #[must_use]
    pub fn new(window: Duration, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            seen: LruCache::new(cap),
        }
    }

    /// Record `id` at `now`. Returns `false` if it was already seen within
    /// the window.
    pub fn insert(&mut self, id: &str, now: Instant) -> bool {
        self.expire(now);
        if self.seen.contains(id) {
            return false;
        }
        self.seen.push(id.to_string(), now);
        true
    }

    fn expire(&mut self, now: Instant) {
        while let Some((_, seen_at)) = self.seen.peek_lru() {
            if now.duration_since(*seen_at) < self.window {
                break;
            }
            self.seen.pop_lru();
        }
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no ids are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

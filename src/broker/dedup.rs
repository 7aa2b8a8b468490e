//! Deduplication of processed publishes.
//!
//! The dedup tracker is what terminates flood propagation: a broker that sees
//! a `(topic, payload)` fingerprint for the second time drops it instead of
//! re-persisting and re-forwarding it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use fnv::FnvHashSet;

/// Set of content hashes a broker has already processed.
pub trait DedupTracker: Send + Sync + fmt::Debug {
    /// Record `hash`. Returns `true` the first time a hash is seen and
    /// `false` for every later call with the same hash.
    fn first_seen(&self, hash: u64) -> bool;

    /// Forget `hash` so that a later publish with the same content is
    /// processed again. Used when persisting a fresh message fails.
    fn forget(&self, hash: u64);

    fn contains(&self, hash: u64) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-lifetime dedup set with no eviction.
#[derive(Debug, Default)]
pub struct InMemoryDedup {
    seen: Mutex<FnvHashSet<u64>>,
}

impl InMemoryDedup {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupTracker for InMemoryDedup {
    fn first_seen(&self, hash: u64) -> bool {
        lock(&self.seen).insert(hash)
    }

    fn forget(&self, hash: u64) {
        lock(&self.seen).remove(&hash);
    }

    fn contains(&self, hash: u64) -> bool {
        lock(&self.seen).contains(&hash)
    }

    fn len(&self) -> usize {
        lock(&self.seen).len()
    }
}

/// Dedup set that remembers at most `capacity` hashes, evicting the oldest
/// first. A publish older than the window is processed again if it comes
/// back, so the window must outlast the time a publish takes to flood the
/// mesh.
#[derive(Debug)]
pub struct WindowedDedup {
    capacity: usize,
    state: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    seen: FnvHashSet<u64>,
    order: VecDeque<u64>,
}

impl WindowedDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(Window::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl DedupTracker for WindowedDedup {
    fn first_seen(&self, hash: u64) -> bool {
        let mut window = lock(&self.state);
        if !window.seen.insert(hash) {
            return false;
        }
        window.order.push_back(hash);
        while window.order.len() > self.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
            }
        }
        true
    }

    fn forget(&self, hash: u64) {
        let mut window = lock(&self.state);
        if window.seen.remove(&hash) {
            window.order.retain(|h| *h != hash);
        }
    }

    fn contains(&self, hash: u64) -> bool {
        lock(&self.state).seen.contains(&hash)
    }

    fn len(&self) -> usize {
        lock(&self.state).seen.len()
    }
}

// A panic while holding the lock cannot leave a hash set half-updated, so a
// poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

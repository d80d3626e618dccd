//! Per-thread trace buffers with bounded, least-recently-used retention
//!
//! Each registered thread owns a [`ThreadTraceState`]: the formatted lines it
//! has produced so far and the start instants of calls still in flight. The
//! [`EventBuffer`] keeps these states in an LRU cache shared by all threads.
//! When more threads are registered than the cache can hold, the state that
//! was touched least recently is evicted and its buffered trace is lost.

use crate::function::CodeId;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Default number of threads that may be tracked at once
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Buffered trace of a single thread
#[derive(Debug, Default)]
pub struct ThreadTraceState {
    /// Formatted trace lines, in append order, without trailing newlines
    pub lines: Vec<String>,
    /// Start instants of calls awaiting their return, keyed by code identity.
    /// A stack per code object keeps recursive calls paired correctly.
    pub call_starts: HashMap<CodeId, Vec<Instant>>,
}

impl ThreadTraceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that a call to `code` started at `at`
    pub fn push_call(&mut self, code: CodeId, at: Instant) {
        self.call_starts.entry(code).or_default().push(at);
    }

    /// Take the start instant of the innermost open call to `code`
    pub fn pop_call(&mut self, code: CodeId) -> Option<Instant> {
        let starts = self.call_starts.get_mut(&code)?;
        let start = starts.pop();
        if starts.is_empty() {
            self.call_starts.remove(&code);
        }
        start
    }

    /// Number of calls that have started but not yet returned
    pub fn open_calls(&self) -> usize {
        self.call_starts.values().map(Vec::len).sum()
    }
}

/// Bounded map from thread key to [`ThreadTraceState`]
///
/// All access goes through one mutex, since every lookup also updates the
/// cache's recency order.
pub struct EventBuffer<K: Hash + Eq> {
    states: Mutex<LruCache<K, ThreadTraceState>>,
    evicted: AtomicU64,
}

impl<K: Hash + Eq + Clone> EventBuffer<K> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            states: Mutex::new(LruCache::new(capacity)),
            evicted: AtomicU64::new(0),
        }
    }

    /// Start a fresh state for `key`, replacing any existing one
    ///
    /// Returns `true` if another thread's state had to be evicted to make room.
    pub fn register(&self, key: K) -> bool {
        let displaced = self.states.lock().push(key.clone(), ThreadTraceState::new());
        match displaced {
            Some((old_key, _)) if old_key != key => {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Run `f` on the state for `key`, marking it most recently used
    ///
    /// Returns `None` without calling `f` when `key` is not registered.
    pub fn with_state<R>(&self, key: &K, f: impl FnOnce(&mut ThreadTraceState) -> R) -> Option<R> {
        self.states.lock().get_mut(key).map(f)
    }

    /// Remove and return the state for `key`
    pub fn take(&self, key: &K) -> Option<ThreadTraceState> {
        self.states.lock().pop(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.states.lock().contains(key)
    }

    /// Number of threads currently tracked
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.states.lock().cap().get()
    }

    /// Number of states dropped to respect the capacity bound
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

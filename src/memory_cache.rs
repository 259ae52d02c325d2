use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::PersistentCache;

/// Process-shared in-memory cache.
///
/// A bounded LRU with a TTL per entry. Clones share the same storage, so one
/// instance can back every resolver in the process.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<CacheState>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    // `None` when the TTL does not fit into an `Instant`; never expires.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl MemoryCache {
    /// Creates a new cache with the given capacity.
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheState::default())),
            capacity,
        }
    }

    /// Returns the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_key(state: &mut CacheState, key: &str) {
        if state.entries.remove(key).is_some() {
            state.order.retain(|existing| existing != key);
        }
    }

    fn touch(state: &mut CacheState, key: &str) {
        state.order.retain(|existing| existing != key);
        state.order.push_back(key.to_string());
    }

    fn prune_expired(state: &mut CacheState, now: Instant) {
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let CacheState { entries, order } = state;
        order.retain(|key| entries.contains_key(key));
    }

    fn evict_if_needed(state: &mut CacheState, capacity: usize) {
        while state.entries.len() > capacity {
            if let Some(key) = state.order.pop_front() {
                state.entries.remove(&key);
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl PersistentCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn available(&self) -> bool {
        self.capacity > 0
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if self.capacity == 0 {
            return None;
        }

        let now = Instant::now();
        let mut guard = self.state();

        let value = match guard.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                Self::remove_key(&mut guard, key);
                return None;
            }
            Some(entry) => entry.value.clone(),
            None => return None,
        };
        Self::touch(&mut guard, key);
        Some(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let mut guard = self.state();
        Self::prune_expired(&mut guard, now);

        guard
            .entries
            .insert(key.to_string(), CacheEntry::new(value, now, ttl));
        Self::touch(&mut guard, key);
        Self::evict_if_needed(&mut guard, self.capacity);
    }

    async fn delete(&self, key: &str) {
        let mut guard = self.state();
        Self::remove_key(&mut guard, key);
    }

    async fn delete_prefix(&self, prefix: &str) -> bool {
        let mut guard = self.state();
        guard.entries.retain(|key, _| !key.starts_with(prefix));
        let CacheState { entries, order } = &mut *guard;
        order.retain(|key| entries.contains_key(key));
        true
    }
}

/// Per-session cache: an unbounded TTL map owned by a single session scope.
///
/// Used when no process-shared backend is available.
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SessionCache {
    /// Creates an empty session cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistentCache for SessionCache {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries()
            .insert(key.to_string(), CacheEntry::new(value, Instant::now(), ttl));
    }

    async fn delete(&self, key: &str) {
        self.entries().remove(key);
    }

    async fn delete_prefix(&self, prefix: &str) -> bool {
        self.entries().retain(|key, _| !key.starts_with(prefix));
        true
    }
}

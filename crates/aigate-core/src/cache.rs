//! In-memory result cache for gateway responses.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::response::ResponseResult;

/// Defines how a single invocation interacts with the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, call providers and write the result to the cache. (Default)
    #[default]
    Use,
    /// Always call providers, skipping any cached entry,
    /// and write the new result to the cache.
    Refresh,
    /// Always call providers and do not read from or write to the cache.
    Bypass,
}

impl CacheMode {
    /// Parses the `cache` invocation option. Unknown values fall back to `Use`.
    pub fn from_option(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "refresh" => Self::Refresh,
            "bypass" | "off" | "none" => Self::Bypass,
            _ => Self::Use,
        }
    }

    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ResponseResult,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe, content-addressed cache of [`ResponseResult`] values.
///
/// Backed by a sharded concurrent map, so lookups never wait on a global lock
/// and never wait on provider I/O.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    max_entries: usize,
    enabled: bool,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ResultCache {
    /// Longest lifetime an entry can get. Longer TTLs are clamped to it.
    pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Create a cache bounded to about `max_entries` results.
    ///
    /// The bound is checked before each insert without a global lock, so
    /// concurrent writers may overshoot it by a few entries until the next put.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            enabled: true,
        }
    }

    /// Create a disabled cache: every lookup misses and writes are dropped.
    pub fn disabled() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: 0,
            enabled: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        !self.enabled
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Get a cached value if it exists and hasn't expired.
    ///
    /// An expired entry found on lookup is removed.
    pub fn get(&self, key: &str) -> Option<ResponseResult> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }

        // The read guard must be released before removing from the same shard.
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// A zero TTL or a disabled cache makes this a no-op. TTLs above
    /// [`Self::MAX_TTL`] are clamped. When the cache is full, expired entries
    /// are purged first, then the entry closest to expiry is evicted.
    pub fn put(&self, key: impl Into<String>, value: ResponseResult, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        let key = key.into();
        let now = Instant::now();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.entries.retain(|_, entry| entry.is_live(now));
            if self.entries.len() >= self.max_entries {
                self.evict_soonest();
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl.min(Self::MAX_TTL),
            },
        );
    }

    fn evict_soonest(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    /// Remove expired entries from the cache.
    pub fn clear_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including ones that expired but were not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! In-memory image cache bounded by decoded byte cost.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::downsampler::decoded_cost;
use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// Default total cost budget (50 MB of decoded pixels).
pub const DEFAULT_COST_LIMIT: usize = 50 * 1024 * 1024;

/// A resident bitmap and its accounted size.
#[derive(Debug, Clone)]
struct CacheEntry {
    image: Arc<image::DynamicImage>,
    cost: usize,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    total_cost: usize,
}

impl Inner {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_cost -= entry.cost;
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<(CacheKey, CacheEntry)> {
        let (key, entry) = self.entries.pop_lru()?;
        self.total_cost -= entry.cost;
        Some((key, entry))
    }
}

/// In-memory LRU cache for decoded images, bounded by total decoded size.
/// Thread-safe; callers need no extra locking.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    cost_limit: usize,
    max_age: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache that holds at most `cost_limit` bytes of decoded pixels.
    #[must_use]
    pub fn new(cost_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            cost_limit,
            max_age: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default budget.
    #[must_use]
    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_COST_LIMIT)
    }

    /// Treats entries older than `max_age` as absent.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Returns the configured budget in bytes.
    #[must_use]
    pub const fn cost_limit(&self) -> usize {
        self.cost_limit
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.max_age
            .is_some_and(|max_age| now.saturating_duration_since(entry.inserted_at) > max_age)
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.max_age.is_none() {
            return 0;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged expired images");
        }
        expired.len()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            size: inner.entries.len(),
            total_cost: inner.total_cost,
            cost_limit: self.cost_limit,
        }
    }

    fn lookup(&self, key: &CacheKey, promote: bool) -> Option<Arc<image::DynamicImage>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let entry = if promote {
            inner.entries.get(key)
        } else {
            inner.entries.peek(key)
        }?;

        if !self.is_expired(entry, now) {
            return Some(entry.image.clone());
        }

        inner.remove(key);
        trace!(key = %key, "Memory cache entry expired");
        None
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_limit()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Decoded bytes currently resident.
    pub total_cost: usize,
    /// Budget in bytes.
    pub cost_limit: usize,
}

impl std::fmt::Display for CacheStats {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MIB: f64 = 1024.0 * 1024.0;
        write!(
            f,
            "Cache: {} images, {:.1}/{:.1} MiB, {:.1}% hit rate ({} hits, {} misses, {} evicted)",
            self.size,
            self.total_cost as f64 / MIB,
            self.cost_limit as f64 / MIB,
            self.hit_rate,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let found = self.lookup(key, true);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        self.lookup(key, false)
    }

    fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) -> bool {
        let cost = decoded_cost(&image);
        let mut inner = self.inner.lock();

        // Entries are never updated in place.
        inner.remove(&key);

        if cost > self.cost_limit {
            debug!(
                key = %key,
                cost,
                limit = self.cost_limit,
                "Image exceeds cache budget, not retained"
            );
            return false;
        }

        let mut evicted = 0u64;
        while inner.total_cost + cost > self.cost_limit {
            let Some((old_key, _)) = inner.pop_lru() else {
                break;
            };
            evicted += 1;
            trace!(key = %old_key, "Evicted image from memory cache");
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }

        inner.entries.put(
            key.clone(),
            CacheEntry {
                image,
                cost,
                inserted_at: Instant::now(),
            },
        );
        inner.total_cost += cost;
        debug!(key = %key, cost, total = inner.total_cost, "Stored image in memory cache");
        true
    }

    fn remove(&self, key: &CacheKey) {
        if self.inner.lock().remove(key).is_some() {
            debug!(key = %key, "Removed image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!(count, "Cleared memory image cache");
    }
}

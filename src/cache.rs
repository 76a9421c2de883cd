//! Content-addressed bundle cache.
//!
//! Entries are keyed by a blake3 digest of the canonical engine results and
//! expire lazily after a fixed TTL. When full, the least recently used entry
//! is evicted. A bundle is serialized once, on insert; every read checks
//! the stored bytes against their CRC32 outside the lock, and a mismatch
//! drops the entry and reports a miss.

use std::collections::HashMap;
use std::fmt;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::input::EngineResult;
use crate::pipeline::canonical;

/// Hex blake3 digest identifying one set of engine results.
///
/// Engine order and timestamps do not affect the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key of a set of engine results.
    #[must_use]
    pub fn of(results: &[EngineResult]) -> Self {
        Self::of_canonical(canonical(results))
    }

    /// Derives the key of results already in canonical order.
    pub(crate) fn of_canonical<'a>(ordered: impl IntoIterator<Item = &'a EngineResult>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for result in ordered {
            update_framed(&mut hasher, result.engine.as_str().as_bytes());
            // Structured fields serialize with sorted keys.
            let payload = serde_json::to_vec(&result.payload).unwrap_or_default();
            update_framed(&mut hasher, &payload);
            hasher.update(&(result.metrics.len() as u64).to_le_bytes());
            for (name, value) in &result.metrics {
                update_framed(&mut hasher, name.as_bytes());
                hasher.update(&value.to_bits().to_le_bytes());
            }
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn update_framed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Counters and sizing of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that returned a bundle.
    pub hits: u64,
    /// Reads that returned nothing.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Entries removed because their checksum did not match.
    pub corruptions: u64,
    /// Live entries.
    pub entries: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Entry lifetime.
    pub ttl: Duration,
}

impl CacheStats {
    /// Fraction of reads that hit, 0 when nothing was read.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            self.hits as f64 / reads as f64
        }
    }
}

#[derive(Debug)]
struct Entry {
    bundle: Arc<Bundle>,
    /// JSON snapshot taken on insert.
    encoded: Arc<[u8]>,
    checksum: u32,
    created_at: Instant,
    last_access: u64,
    hit_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    tick: u64,
    stats: CacheStats,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.stats.evictions += 1;
                debug!(key = %key, "evicted least recently used bundle");
                true
            }
            None => false,
        }
    }
}

/// LRU + TTL cache of correlation bundles.
///
/// Bookkeeping takes the single internal lock; serialization and checksum
/// verification run outside it.
#[derive(Debug)]
pub struct CorrelationCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
    #[cfg(test)]
    encodes: AtomicUsize,
}

impl CorrelationCache {
    /// Create a cache holding at most `capacity` bundles for `ttl` each.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                stats: CacheStats {
                    capacity,
                    ttl,
                    ..CacheStats::default()
                },
                ..Inner::default()
            }),
            capacity,
            ttl,
            #[cfg(test)]
            encodes: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a bundle, refreshing its recency on a hit.
    ///
    /// Expired and corrupted entries are dropped and reported as misses.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Bundle>> {
        let (bundle, encoded, expected) = {
            let mut inner = self.lock();
            let expired = match inner.entries.get(key) {
                None => {
                    inner.stats.misses += 1;
                    return None;
                }
                Some(entry) => entry.created_at.elapsed() >= self.ttl,
            };
            if expired {
                inner.entries.remove(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                debug!(key = %key, "cached bundle expired");
                return None;
            }
            let entry = inner.entries.get(key)?;
            (Arc::clone(&entry.bundle), Arc::clone(&entry.encoded), entry.checksum)
        };

        let intact = checksum(&encoded) == expected;

        let mut inner = self.lock();
        let tick = inner.next_tick();
        // The entry may have been replaced or removed while unlocked.
        let current = inner
            .entries
            .get(key)
            .is_some_and(|e| Arc::ptr_eq(&e.bundle, &bundle));
        if !intact {
            if current {
                inner.entries.remove(key);
            }
            inner.stats.corruptions += 1;
            inner.stats.misses += 1;
            warn!(key = %key, "cached bundle failed its checksum; dropped");
            return None;
        }
        if current {
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.last_access = tick;
                entry.hit_count += 1;
            }
        }
        inner.stats.hits += 1;
        Some(bundle)
    }

    /// Stores a bundle, evicting the least recently used entry when full.
    ///
    /// Replacing an existing key never evicts.
    pub fn insert(&self, key: CacheKey, bundle: Arc<Bundle>) {
        let encoded: Arc<[u8]> = match serde_json::to_vec(bundle.as_ref()) {
            Ok(data) => data.into(),
            Err(err) => {
                warn!(key = %key, error = %err, "bundle could not be serialized; not cached");
                return;
            }
        };
        #[cfg(test)]
        self.encodes.fetch_add(1, Ordering::Relaxed);
        let sum = checksum(&encoded);

        let mut inner = self.lock();
        let tick = inner.next_tick();
        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.capacity {
                if !inner.evict_lru() {
                    break;
                }
            }
        }
        inner.entries.insert(
            key,
            Entry {
                bundle,
                encoded,
                checksum: sum,
                created_at: Instant::now(),
                last_access: tick,
                hit_count: 0,
            },
        );
    }

    /// Returns true if a live entry exists. Does not touch recency or counters.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock()
            .entries
            .get(key)
            .is_some_and(|e| e.created_at.elapsed() < self.ttl)
    }

    /// Number of reads served by an entry, if present.
    #[must_use]
    pub fn hit_count(&self, key: &CacheKey) -> Option<u64> {
        self.lock().entries.get(key).map(|e| e.hit_count)
    }

    /// Removes one entry. Returns true if it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Removes every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Drops every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, e| e.created_at.elapsed() < ttl);
        let purged = before - inner.entries.len();
        inner.stats.expirations += purged as u64;
        purged
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }

    #[cfg(test)]
    fn encodes(&self) -> usize {
        self.encodes.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn corrupt(&self, key: &CacheKey) {
        if let Some(entry) = self.lock().entries.get_mut(key) {
            entry.checksum ^= 0xdead_beef;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(n: usize) -> Arc<Bundle> {
        Arc::new(Bundle::empty(n))
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::of(&[EngineResult::text("a", s), EngineResult::text("b", s)])
    }

    #[test]
    fn key_ignores_order_and_timestamps() {
        let a = EngineResult::text("a", "one");
        let b = EngineResult::text("b", "two").with_metric("coverage", 80.0);
        let later = b.clone().at(chrono::Utc::now() + chrono::Duration::hours(1));
        assert_eq!(CacheKey::of(&[a.clone(), b.clone()]), CacheKey::of(&[later, a.clone()]));
        assert_ne!(
            CacheKey::of(&[a.clone(), b]),
            CacheKey::of(&[a, EngineResult::text("b", "two")])
        );
    }

    #[test]
    fn key_ignores_structured_field_order() {
        let x: serde_json::Value = serde_json::from_str(r#"{"x": 1, "y": "two"}"#).unwrap();
        let y: serde_json::Value = serde_json::from_str(r#"{"y": "two", "x": 1}"#).unwrap();
        assert_eq!(
            CacheKey::of(&[EngineResult::structured("a", x)]),
            CacheKey::of(&[EngineResult::structured("a", y)])
        );
    }

    #[test]
    fn hit_returns_same_arc() {
        let cache = CorrelationCache::new(4, Duration::from_secs(60));
        let b = bundle(2);
        cache.insert(key("x"), Arc::clone(&b));
        let got = cache.get(&key("x")).unwrap();
        assert!(Arc::ptr_eq(&got, &b));
        assert_eq!(cache.hit_count(&key("x")), Some(1));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 0, 1));
    }

    #[test]
    fn corrupted_entry_is_dropped() {
        let cache = CorrelationCache::new(4, Duration::from_secs(60));
        cache.insert(key("x"), bundle(2));
        cache.corrupt(&key("x"));
        assert!(cache.get(&key("x")).is_none());
        let stats = cache.stats();
        assert_eq!(stats.corruptions, 1);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn hits_reuse_the_insert_snapshot() {
        let cache = CorrelationCache::new(4, Duration::from_secs(60));
        cache.insert(key("x"), bundle(2));
        assert_eq!(cache.encodes(), 1);
        for _ in 0..100 {
            assert!(cache.get(&key("x")).is_some());
        }
        assert_eq!(cache.encodes(), 1);
        assert_eq!(cache.hit_count(&key("x")), Some(100));

        cache.insert(key("x"), bundle(3));
        assert_eq!(cache.encodes(), 2);
    }

    #[test]
    fn lru_entry_is_evicted() {
        let cache = CorrelationCache::new(2, Duration::from_secs(60));
        cache.insert(key("a"), bundle(2));
        cache.insert(key("b"), bundle(2));
        assert!(cache.get(&key("a")).is_some());
        cache.insert(key("c"), bundle(2));
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache = CorrelationCache::new(2, Duration::from_secs(60));
        cache.insert(key("a"), bundle(2));
        cache.insert(key("b"), bundle(2));
        cache.insert(key("a"), bundle(3));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key("a")).unwrap().engine_count, 3);
    }

    #[test]
    fn zero_ttl_always_expires() {
        let cache = CorrelationCache::new(2, Duration::ZERO);
        cache.insert(key("a"), bundle(2));
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = CorrelationCache::new(4, Duration::from_secs(60));
        cache.insert(key("a"), bundle(2));
        cache.insert(key("b"), bundle(2));
        assert!(cache.invalidate(&key("a")));
        assert!(!cache.invalidate(&key("a")));
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}

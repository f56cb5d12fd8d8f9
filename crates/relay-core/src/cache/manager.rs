//! In-memory response cache

use bytes::Bytes;
use parking_lot::RwLock;
use relay_proxy::UpstreamResponse;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a stored response is served
    pub ttl: Duration,
    /// Upper bound on stored entries, expired or not
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_entries: None,
        }
    }
}

/// A stored upstream response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Upstream URL the response was fetched from
    pub key: String,
    pub stored_at: Instant,
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Cache counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub entry_count: usize,
}

/// Entries plus an index ordered by store time
#[derive(Default)]
struct Slots {
    entries: HashMap<String, (u64, Arc<CacheEntry>)>,
    by_age: BTreeMap<(Instant, u64), String>,
    next_seq: u64,
}

impl Slots {
    fn insert(&mut self, entry: Arc<CacheEntry>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_age.insert((entry.stored_at, seq), entry.key.clone());
        if let Some((old_seq, old)) = self.entries.insert(entry.key.clone(), (seq, entry)) {
            self.by_age.remove(&(old.stored_at, old_seq));
        }
    }

    /// Pop the oldest entry if `evict` accepts it
    fn pop_oldest_if(&mut self, evict: impl Fn(&CacheEntry) -> bool) -> Option<Arc<CacheEntry>> {
        let (_, key) = self.by_age.first_key_value()?;
        if !self.entries.get(key).is_some_and(|(_, e)| evict(e)) {
            return None;
        }
        let (_, key) = self.by_age.pop_first()?;
        self.entries.remove(&key).map(|(_, e)| e)
    }

    /// Drop expired entries from the old end of the index
    fn purge(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut purged = 0;
        while self
            .pop_oldest_if(|e| now.saturating_duration_since(e.stored_at) >= ttl)
            .is_some()
        {
            purged += 1;
        }
        purged
    }
}

/// Per-instance response cache keyed by upstream URL
///
/// Entries are replaced whole and handed out as `Arc`s, so readers never
/// observe a partially written entry. Expiry is checked on lookup only;
/// `purge_expired` reclaims memory.
pub struct ResponseCache {
    slots: RwLock<Slots>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a new response cache
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Initializing response cache (ttl: {:?}, max_entries: {:?})",
            config.ttl, config.max_entries
        );

        Self {
            slots: RwLock::new(Slots::default()),
            clock,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.config.ttl
    }

    /// Get a live entry
    ///
    /// Expired entries are reported as absent but left in place.
    pub fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now();
        let entry = self
            .slots
            .read()
            .entries
            .get(key)
            .map(|(_, e)| e)
            .filter(|e| self.is_fresh(e, now))
            .cloned();

        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("relay_cache_hits_total").increment(1);
                debug!("Cache hit: {}", key);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("relay_cache_misses_total").increment(1);
                debug!("Cache miss: {}", key);
                None
            }
        }
    }

    /// Store a response, replacing any previous entry for `key`
    ///
    /// At capacity, expired entries go first; if none had expired, the
    /// oldest live entry is evicted.
    pub fn store(&self, key: &str, response: UpstreamResponse) -> Arc<CacheEntry> {
        let now = self.clock.now();
        let entry = Arc::new(CacheEntry {
            key: key.to_string(),
            stored_at: now,
            status: response.status,
            body: response.body,
            content_type: response.content_type,
        });

        let mut slots = self.slots.write();

        let at_capacity = self
            .config
            .max_entries
            .filter(|max| !slots.entries.contains_key(key) && slots.entries.len() >= *max);

        if let Some(max) = at_capacity {
            if slots.purge(now, self.config.ttl) == 0 {
                if let Some(evicted) = slots.pop_oldest_if(|_| true) {
                    warn!("Cache full ({} entries), evicting {}", max, evicted.key);
                }
            }
        }

        debug!("Caching {} ({} bytes)", key, entry.body.len());
        slots.insert(entry.clone());
        entry
    }

    /// Remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.slots.write().purge(now, self.config.ttl)
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.slots.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.write();
        let count = slots.entries.len();
        slots.entries.clear();
        slots.by_age.clear();
        info!("Cleared {} cache entries", count);
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            entry_count: self.len(),
        }
    }
}

/// Spawn a background task that purges expired entries periodically
pub fn spawn_sweep_task(
    cache: Arc<ResponseCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    info!("Starting background cache sweep task (interval: {:?})", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!("Cache sweep purged {} expired entries", purged);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const KEY: &str = "https://games.roblox.com/v1/games/1";

    fn cache_with(config: CacheConfig) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResponseCache::new(config, clock.clone()), clock)
    }

    fn ok(body: &'static str) -> UpstreamResponse {
        UpstreamResponse::new(200, body, Some("application/json"))
    }

    #[test]
    fn test_lookup_within_ttl() {
        let (cache, clock) = cache_with(CacheConfig {
            ttl: Duration::from_secs(30),
            max_entries: None,
        });
        assert!(cache.lookup(KEY).is_none());

        cache.store(KEY, ok("{\"id\":1}"));
        clock.advance(Duration::from_secs(29));

        let entry = cache.lookup(KEY).unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, "{\"id\":1}");
        assert_eq!(entry.content_type.as_deref(), Some("application/json"));

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn test_expiry_is_lazy() {
        let (cache, clock) = cache_with(CacheConfig {
            ttl: Duration::from_secs(30),
            max_entries: None,
        });
        cache.store(KEY, ok("{}"));

        // Expiry boundary is inclusive: age == ttl is expired
        clock.advance(Duration::from_secs(30));
        assert!(cache.lookup(KEY).is_none());
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_overwrites() {
        let (cache, clock) = cache_with(CacheConfig::default());
        cache.store(KEY, ok("first"));
        clock.advance(Duration::from_secs(20));
        cache.store(KEY, ok("second"));
        clock.advance(Duration::from_secs(20));

        // Age is measured from the latest store
        let entry = cache.lookup(KEY).unwrap();
        assert_eq!(entry.body, "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_held_entry_survives_overwrite() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        cache.store(KEY, ok("first"));
        let held = cache.lookup(KEY).unwrap();

        cache.store(KEY, ok("second"));

        assert_eq!(held.body, "first");
        assert_eq!(cache.lookup(KEY).unwrap().body, "second");
    }

    #[test]
    fn test_max_entries_prefers_expired_then_oldest() {
        let (cache, clock) = cache_with(CacheConfig {
            ttl: Duration::from_secs(10),
            max_entries: Some(2),
        });

        cache.store("a", ok("a"));
        clock.advance(Duration::from_secs(11));
        cache.store("b", ok("b"));
        clock.advance(Duration::from_secs(1));
        cache.store("c", ok("c"));

        // "a" had expired and made room for "c"
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("b").is_some());
        assert!(cache.lookup("c").is_some());

        clock.advance(Duration::from_secs(1));
        cache.store("d", ok("d"));

        // Nothing expired, so the oldest live entry is evicted
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("b").is_none());
        assert!(cache.lookup("d").is_some());
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let (cache, _clock) = cache_with(CacheConfig {
            ttl: Duration::from_secs(10),
            max_entries: Some(1),
        });
        cache.store(KEY, ok("first"));
        cache.store(KEY, ok("second"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(KEY).unwrap().body, "second");
    }

    #[test]
    fn test_overwrite_refreshes_eviction_order() {
        let (cache, clock) = cache_with(CacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: Some(2),
        });

        cache.store("a", ok("a"));
        clock.advance(Duration::from_secs(1));
        cache.store("b", ok("b"));
        clock.advance(Duration::from_secs(1));
        cache.store("a", ok("a2"));
        clock.advance(Duration::from_secs(1));
        cache.store("c", ok("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("b").is_none());
        assert_eq!(cache.lookup("a").unwrap().body, "a2");
        assert!(cache.lookup("c").is_some());
    }

    #[test]
    fn test_purge_leaves_live_entries() {
        let (cache, clock) = cache_with(CacheConfig {
            ttl: Duration::from_secs(10),
            max_entries: None,
        });

        for i in 0..100 {
            cache.store(&format!("old-{}", i), ok("{}"));
        }
        clock.advance(Duration::from_secs(8));
        cache.store("young", ok("{}"));
        clock.advance(Duration::from_secs(3));

        assert_eq!(cache.purge_expired(), 100);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("young").is_some());
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_clear() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        cache.store("a", ok("a"));
        cache.store("b", ok("b"));
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_purges() {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(ResponseCache::new(
            CacheConfig {
                ttl: Duration::from_secs(5),
                max_entries: None,
            },
            clock.clone(),
        ));
        cache.store(KEY, ok("{}"));
        clock.advance(Duration::from_secs(6));

        let handle = spawn_sweep_task(cache.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(cache.is_empty());
        handle.abort();
    }
}

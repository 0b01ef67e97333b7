//! Result caching for queries.
//!
//! A [`Cache`] stores fully resolved query results (merged associations
//! included) as JSON under the query's checksum key. Entries carry tags so
//! writes can invalidate every cached query at once.

use std::collections::HashMap;
use std::sync::Mutex;

/// Tag attached to every cached query result.
pub const TAG_QUERY: &str = "relmap.query";

/// Options recorded with a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub tags: Vec<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Cache backend used by queries.
pub trait Cache: Send + Sync {
    /// Cached value for `key`, `None` on a miss.
    fn load(&self, key: &str) -> Option<serde_json::Value>;

    fn save(&self, key: &str, value: serde_json::Value, options: &CacheOptions);

    /// Drop every entry carrying any of `tags`.
    fn clean(&self, tags: &[&str]);
}

#[derive(Debug)]
struct CachedEntry {
    value: serde_json::Value,
    tags: Vec<String>,
    last_used: u64,
    hit_count: u64,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, CachedEntry>,
    max_size: usize,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = lru {
            tracing::trace!(key = %key, "Evicting cached query");
            self.entries.remove(&key);
        }
    }
}

/// In-process cache with least-recently-used eviction.
///
/// # Example
///
/// ```
/// use relmap_query::cache::{Cache, CacheOptions, MemoryCache};
///
/// let cache = MemoryCache::new(100);
/// cache.save("a", serde_json::json!([1, 2]), &CacheOptions::new().tag("heroes"));
/// assert_eq!(cache.load("a"), Some(serde_json::json!([1, 2])));
///
/// cache.clean(&["heroes"]);
/// assert_eq!(cache.load("a"), None);
/// ```
#[derive(Debug)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    /// Create a cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(max_size.min(256)),
                max_size: max_size.max(1),
                tick: 0,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Number of loads served by `key`.
    pub fn hits(&self, key: &str) -> u64 {
        self.state().entries.get(key).map_or(0, |e| e.hit_count)
    }

    pub fn clear(&self) {
        self.state().entries.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Cache for MemoryCache {
    fn load(&self, key: &str) -> Option<serde_json::Value> {
        let mut state = self.state();
        let tick = state.next_tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_used = tick;
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    fn save(&self, key: &str, value: serde_json::Value, options: &CacheOptions) {
        let mut state = self.state();
        if !state.entries.contains_key(key) && state.entries.len() >= state.max_size {
            state.evict_lru();
        }
        let tick = state.next_tick();
        state.entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                tags: options.tags.clone(),
                last_used: tick,
                hit_count: 0,
            },
        );
    }

    fn clean(&self, tags: &[&str]) {
        let mut state = self.state();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(&t.as_str())));
        tracing::debug!(
            tags = ?tags,
            removed = before - state.entries.len(),
            "Cleaned cached queries"
        );
    }
}

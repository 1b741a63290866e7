//! Negative lookup cache
//!
//! Remembers names a fresh listing confirmed absent, so repeated misses on
//! the same name do not re-list the bucket until the entry expires.

use std::time::Duration;

use moka::sync::Cache;

use crate::graph::HandleId;

const MAX_ENTRIES: u64 = 10_000;

#[derive(Clone)]
pub struct NegativeCache {
    inner: Option<Cache<(HandleId, String), ()>>,
}

impl std::fmt::Debug for NegativeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegativeCache")
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

impl NegativeCache {
    /// A zero `ttl` disables the cache.
    pub fn new(ttl: Duration) -> Self {
        let inner = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(ttl)
                .build()
        });
        Self { inner }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn contains(&self, dir: HandleId, name: &str) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|c| c.contains_key(&(dir, name.to_string())))
    }

    pub fn insert(&self, dir: HandleId, name: &str) {
        if let Some(cache) = &self.inner {
            cache.insert((dir, name.to_string()), ());
        }
    }

    pub fn forget(&self, dir: HandleId, name: &str) {
        if let Some(cache) = &self.inner {
            cache.invalidate(&(dir, name.to_string()));
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_forget() {
        let cache = NegativeCache::new(Duration::from_secs(60));
        let dir = HandleId::ROOT;

        assert!(!cache.contains(dir, "missing"));
        cache.insert(dir, "missing");
        assert!(cache.contains(dir, "missing"));
        assert!(!cache.contains(dir, "other"));

        cache.forget(dir, "missing");
        assert!(!cache.contains(dir, "missing"));
    }

    #[test]
    fn test_zero_ttl_disables() {
        let cache = NegativeCache::new(Duration::ZERO);
        cache.insert(HandleId::ROOT, "x");
        assert!(!cache.is_enabled());
        assert!(!cache.contains(HandleId::ROOT, "x"));
    }
}

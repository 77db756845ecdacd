//! In-memory memoization of registry answers.

use crate::types::{PackageIdentity, ResolvedPackage, ScopeRecord};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest entry lifetime, thirty days.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Cache entry with TTL.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe cache bounded by entry count and TTL.
#[derive(Debug, Clone)]
pub struct TtlCache<K: Eq + Hash, V> {
    cache: Arc<DashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            ttl: ttl.min(MAX_TTL),
            capacity: capacity.max(1),
        }
    }

    /// Get a cached value if it exists and hasn't expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.cache.get(key)?;
        if Instant::now() < entry.expires_at {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.cache.remove(key);
        None
    }

    /// Store a value, evicting to stay within capacity.
    pub fn set(&self, key: K, value: V) {
        if !self.cache.contains_key(&key) && self.cache.len() >= self.capacity {
            self.evict();
        }
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: now.checked_add(self.ttl).unwrap_or(now),
        };
        self.cache.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop expired entries; if none were expired, drop the oldest one.
    fn evict(&self) {
        let now = Instant::now();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.expires_at > now);
        if self.cache.len() < before {
            return;
        }

        let oldest = self
            .cache
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.cache.remove(&key);
        }
    }
}

/// Memoized registry answers for one run, keyed by value.
#[derive(Debug, Clone)]
pub struct ResolutionMemo {
    packages: TtlCache<PackageIdentity, ResolvedPackage>,
    scopes: TtlCache<(String, String), ScopeRecord>,
}

impl ResolutionMemo {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            packages: TtlCache::new(capacity, ttl),
            scopes: TtlCache::new(capacity, ttl),
        }
    }

    pub fn get_package(&self, identity: &PackageIdentity) -> Option<ResolvedPackage> {
        self.packages.get(identity)
    }

    pub fn set_package(&self, package: ResolvedPackage) {
        self.packages.set(package.identity.clone(), package);
    }

    pub fn get_scope(&self, name: &str, registry_host: &str) -> Option<ScopeRecord> {
        self.scopes.get(&(name.to_string(), registry_host.to_string()))
    }

    pub fn set_scope(&self, scope: ScopeRecord) {
        self.scopes
            .set((scope.name.clone(), scope.registry_host.clone()), scope);
    }
}

impl Default for ResolutionMemo {
    fn default() -> Self {
        Self::new(1024, Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ecosystem;

    #[test]
    fn test_cache_set_get() {
        let cache: TtlCache<String, u16> = TtlCache::new(8, Duration::from_secs(60));
        cache.set("lodash".to_string(), 200);
        assert_eq!(cache.get(&"lodash".to_string()), Some(200));
    }

    #[test]
    fn test_cache_miss() {
        let cache: TtlCache<String, u16> = TtlCache::new(8, Duration::from_secs(60));
        assert!(cache.get(&"nonexistent".to_string()).is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache: TtlCache<String, u16> = TtlCache::new(8, Duration::ZERO);
        cache.set("lodash".to_string(), 200);
        assert!(cache.get(&"lodash".to_string()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let cache: TtlCache<String, u16> = TtlCache::new(8, Duration::from_secs(u64::MAX));
        cache.set("lodash".to_string(), 200);
        assert_eq!(cache.get(&"lodash".to_string()), Some(200));
        assert_eq!(cache.ttl, MAX_TTL);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache: TtlCache<u32, u32> = TtlCache::new(3, Duration::from_secs(60));
        for i in 0..10 {
            cache.set(i, i);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&9), Some(9));
    }

    #[test]
    fn test_memo_is_keyed_by_value() {
        let memo = ResolutionMemo::default();
        let package = ResolvedPackage::unresolved(
            PackageIdentity::new("requests", Ecosystem::PyPi),
            Ecosystem::PyPi,
        );
        memo.set_package(package.clone());

        let lookup = PackageIdentity::new(String::from("requests"), Ecosystem::PyPi);
        assert_eq!(memo.get_package(&lookup), Some(package));
        assert!(memo
            .get_package(&PackageIdentity::new("requests", Ecosystem::Npm))
            .is_none());
    }
}

//! Key-value cache with per-entry expiry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A thread-safe cache whose entries expire after a fixed lifetime.
///
/// Writes are last-write-wins. Expired entries are evicted when read and
/// swept on every insert.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (V, Instant)>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Creates a cache with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns a live entry.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().remove(key);
        None
    }

    /// Inserts or replaces an entry, restarting its lifetime.
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key, (value, now + self.ttl));
    }

    /// Updates a live entry in place, keeping its expiry.
    ///
    /// Returns false if the entry is missing or expired.
    pub fn update(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some((value, expires)) if *expires > Instant::now() => {
                f(value);
                true
            }
            _ => false,
        }
    }

    /// Removes an entry.
    pub fn invalidate(&self, key: &K) {
        self.entries.write().remove(key);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn inserts_sweep_expired_entries() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("job-1", 1);
        cache.insert("job-2", 2);
        std::thread::sleep(Duration::from_millis(40));

        cache.insert("job-3", 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"job-3"), Some(3));
    }

    #[test]
    fn update_keeps_entry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("job", 0);
        assert!(cache.update(&"job", |v| *v += 5));
        assert_eq!(cache.get(&"job"), Some(5));
        assert!(!cache.update(&"missing", |v| *v += 1));
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

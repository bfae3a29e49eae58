//! Storage for sync configurations.

use crate::config::{Direction, SyncConfiguration};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Where sync configurations live.
pub trait ConfigurationStore: Send + Sync {
    /// Loads a configuration by name.
    fn get(&self, name: &str) -> SyncResult<SyncConfiguration>;

    /// Returns every configuration, ordered by name.
    fn all(&self) -> SyncResult<Vec<SyncConfiguration>>;

    /// Inserts or replaces a configuration.
    fn put(&self, config: SyncConfiguration) -> SyncResult<()>;

    /// Removes a configuration, returning it.
    fn remove(&self, name: &str) -> SyncResult<SyncConfiguration>;

    /// Advances a direction's watermark.
    fn set_watermark(&self, name: &str, direction: Direction, at: DateTime<Utc>) -> SyncResult<()>;

    /// Configurations that fire for records of `collection`: enabled ones
    /// with it as source, plus enabled bidirectional ones with it as target.
    fn for_collection(&self, collection: &str) -> SyncResult<Vec<SyncConfiguration>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|c| c.enabled && c.watches(collection))
            .collect())
    }
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfigurationStore {
    configs: RwLock<BTreeMap<String, SyncConfiguration>>,
}

impl MemoryConfigurationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored configurations.
    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}

impl ConfigurationStore for MemoryConfigurationStore {
    fn get(&self, name: &str) -> SyncResult<SyncConfiguration> {
        self.configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::ConfigurationNotFound(name.to_string()))
    }

    fn all(&self) -> SyncResult<Vec<SyncConfiguration>> {
        Ok(self.configs.read().values().cloned().collect())
    }

    fn put(&self, config: SyncConfiguration) -> SyncResult<()> {
        self.configs.write().insert(config.name.clone(), config);
        Ok(())
    }

    fn remove(&self, name: &str) -> SyncResult<SyncConfiguration> {
        self.configs
            .write()
            .remove(name)
            .ok_or_else(|| SyncError::ConfigurationNotFound(name.to_string()))
    }

    fn set_watermark(&self, name: &str, direction: Direction, at: DateTime<Utc>) -> SyncResult<()> {
        let mut configs = self.configs.write();
        let config = configs
            .get_mut(name)
            .ok_or_else(|| SyncError::ConfigurationNotFound(name.to_string()))?;
        config.set_watermark(direction, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_collection() {
        let store = MemoryConfigurationStore::new();
        store
            .put(SyncConfiguration::new("a", "Employee", "User").bidirectional())
            .unwrap();
        store
            .put(SyncConfiguration::new("b", "Employee", "Contact"))
            .unwrap();
        let mut disabled = SyncConfiguration::new("c", "Employee", "Lead");
        disabled.enabled = false;
        store.put(disabled).unwrap();

        let names = |c: &str| -> Vec<String> {
            store
                .for_collection(c)
                .unwrap()
                .into_iter()
                .map(|c| c.name)
                .collect()
        };
        assert_eq!(names("Employee"), vec!["a", "b"]);
        assert_eq!(names("User"), vec!["a"]);
        assert!(names("Contact").is_empty());
    }

    #[test]
    fn watermarks_persist() {
        let store = MemoryConfigurationStore::new();
        store.put(SyncConfiguration::new("a", "A", "B")).unwrap();
        let now = Utc::now();
        store.set_watermark("a", Direction::Forward, now).unwrap();
        assert_eq!(store.get("a").unwrap().last_synced_forward, Some(now));
        assert!(matches!(
            store.set_watermark("missing", Direction::Forward, now),
            Err(SyncError::ConfigurationNotFound(_))
        ));
    }
}

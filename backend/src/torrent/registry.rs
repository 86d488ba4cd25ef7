//! In-memory map from a record's `filename` to its live download handle
//!
//! Ingestion inserts, the progress monitor reads and removes. `get` hands out a
//! cloned `Arc`, so a poll that is in progress keeps its handle alive even if
//! the key is removed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::TorrentHandle;

#[derive(Default)]
pub struct HandleRegistry {
    handles: RwLock<HashMap<String, Arc<dyn TorrentHandle>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `key`, returning the handle it replaced
    pub fn insert(
        &self,
        key: impl Into<String>,
        handle: Arc<dyn TorrentHandle>,
    ) -> Option<Arc<dyn TorrentHandle>> {
        self.handles.write().insert(key.into(), handle)
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn TorrentHandle>> {
        self.handles.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handles.read().contains_key(key)
    }

    /// Release ownership of the handle registered under `key`
    pub fn remove(&self, key: &str) -> Option<Arc<dyn TorrentHandle>> {
        self.handles.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHandle;

    #[test]
    fn test_insert_get_remove() {
        let registry = HandleRegistry::new();
        let handle = FakeHandle::new("Show.S01");

        assert!(registry.insert("Show.S01", handle.clone()).is_none());
        assert!(registry.contains("Show.S01"));
        assert_eq!(registry.get("Show.S01").unwrap().name(), "Show.S01");
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("Show.S01").is_some());
        assert!(registry.remove("Show.S01").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_outlives_removal() {
        let registry = HandleRegistry::new();
        let handle = FakeHandle::new("Movie");
        handle.set_progress(0.3);
        registry.insert("Movie", handle);

        let polled = registry.get("Movie").unwrap();
        registry.remove("Movie");

        assert_eq!(polled.status().progress, 0.3);
    }

    #[test]
    fn test_concurrent_insert_and_remove() {
        let registry = Arc::new(HandleRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{}-{}", t, i);
                        registry.insert(key.clone(), FakeHandle::new(&key));
                        if i % 2 == 0 {
                            registry.remove(&key);
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 50);
    }
}

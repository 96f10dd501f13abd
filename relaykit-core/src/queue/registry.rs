//! Registry mapping queue identifiers to stores

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::queue::store::QueueStore;
use crate::storage;

/// Owns the identifier-to-store mapping.
///
/// One registry-wide mutex guards the shape of the map; per-store buffers
/// carry their own locks. Iteration for upload/archive copies the `Arc`s out
/// under the lock and releases it before doing any per-store work, so slow
/// disk or drain operations never hold up `add`/`remove`.
pub struct QueueRegistry {
    root: PathBuf,
    stores: Mutex<HashMap<String, Arc<QueueStore>>>,
}

impl QueueRegistry {
    /// Open a registry whose stores persist under `base` (versioned
    /// subdirectory created on demand).
    pub fn open(base: &Path) -> Result<Self> {
        let root = storage::init_root(base)?;
        Ok(Self {
            root,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Create and register a queue.
    ///
    /// Fails with [`Error::QueueExists`] on a duplicate identifier (the
    /// original queue is untouched) and propagates store-construction
    /// failures without inserting anything.
    pub fn add(&self, identifier: &str, config: QueueConfig) -> Result<()> {
        let mut stores = self.stores.lock().unwrap();

        if stores.contains_key(identifier) {
            return Err(Error::QueueExists(identifier.to_string()));
        }

        let store = QueueStore::open(identifier, config, &self.root)?;
        stores.insert(identifier.to_string(), Arc::new(store));
        tracing::debug!(queue = %identifier, "Registered queue");
        Ok(())
    }

    /// Remove a queue and delete its snapshot.
    ///
    /// Fails with [`Error::QueueNotFound`] when absent. An augmentation task
    /// still holding this identifier will re-resolve it after the provider
    /// fires, find nothing, and drop its event.
    ///
    /// The snapshot is deleted before the queue is unregistered: a failed
    /// deletion leaves the queue in place, so a later `add` with the same
    /// identifier can never resurrect stale contents from an orphaned file.
    pub fn remove(&self, identifier: &str) -> Result<()> {
        let mut stores = self.stores.lock().unwrap();

        let store = stores
            .get(identifier)
            .ok_or_else(|| Error::QueueNotFound(identifier.to_string()))?;

        storage::remove_snapshot(store.snapshot_path())?;
        stores.remove(identifier);
        tracing::debug!(queue = %identifier, "Removed queue");
        Ok(())
    }

    /// Resolve a queue by identifier.
    ///
    /// This is the lookup-at-use-time replacement for holding a long-lived
    /// reference to a store: callbacks keep the identifier and call this when
    /// they fire, treating `None` as a silent drop.
    pub fn get(&self, identifier: &str) -> Option<Arc<QueueStore>> {
        self.stores
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
    }

    /// Whether a queue with this identifier is registered.
    pub fn contains(&self, identifier: &str) -> bool {
        self.stores
            .lock()
            .unwrap()
            .contains_key(identifier)
    }

    /// Copy out the current set of stores for lock-free per-store work.
    pub fn snapshot(&self) -> Vec<Arc<QueueStore>> {
        self.stores
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered queues.
    pub fn len(&self) -> usize {
        self.stores.lock().unwrap().len()
    }

    /// Whether no queues are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRecord;
    use tempfile::TempDir;

    fn registry() -> (TempDir, QueueRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = QueueRegistry::open(dir.path()).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_add_and_get() {
        let (_dir, registry) = registry();
        registry.add("clicks", QueueConfig::default()).unwrap();

        assert!(registry.contains("clicks"));
        assert!(registry.get("clicks").is_some());
        assert!(registry.get("taps").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_add_leaves_original_untouched() {
        let (_dir, registry) = registry();
        registry.add("clicks", QueueConfig::default()).unwrap();

        let store = registry.get("clicks").unwrap();
        store.append(EventRecord::new("e1").with_user("alice")).unwrap();

        let err = registry.add("clicks", QueueConfig::default()).unwrap_err();
        assert!(matches!(err, Error::QueueExists(_)));
        assert_eq!(registry.get("clicks").unwrap().len(), 1);
    }

    #[test]
    fn test_remove_unknown_fails() {
        let (_dir, registry) = registry();
        let err = registry.remove("ghost").unwrap_err();
        assert!(matches!(err, Error::QueueNotFound(_)));
    }

    #[test]
    fn test_remove_deletes_snapshot() {
        let (dir, registry) = registry();
        registry.add("clicks", QueueConfig::default()).unwrap();

        let store = registry.get("clicks").unwrap();
        store.append(EventRecord::new("e1").with_user("alice")).unwrap();
        let path = store.snapshot_path().to_path_buf();
        assert!(path.exists());
        drop(store);

        registry.remove("clicks").unwrap();
        assert!(!registry.contains("clicks"));
        assert!(!path.exists());

        // Re-adding starts fresh rather than resurrecting old contents
        registry.add("clicks", QueueConfig::default()).unwrap();
        assert!(registry.get("clicks").unwrap().is_empty());
        drop(dir);
    }

    #[test]
    fn test_failed_snapshot_deletion_keeps_queue_registered() {
        let (_dir, registry) = registry();
        registry.add("clicks", QueueConfig::default()).unwrap();

        let store = registry.get("clicks").unwrap();
        store.append(EventRecord::new("e1").with_user("alice")).unwrap();

        // Make deletion fail by swapping the snapshot for a directory
        let path = store.snapshot_path().to_path_buf();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(registry.remove("clicks").is_err());
        assert!(registry.contains("clicks"));

        // Once deletion can succeed, removal completes cleanly
        std::fs::remove_dir(&path).unwrap();
        registry.remove("clicks").unwrap();
        assert!(!registry.contains("clicks"));
    }

    #[test]
    fn test_snapshot_copies_stores_out() {
        let (_dir, registry) = registry();
        registry.add("a", QueueConfig::default()).unwrap();
        registry.add("b", QueueConfig::default()).unwrap();

        let stores = registry.snapshot();
        assert_eq!(stores.len(), 2);

        // Mutating the registry does not invalidate the copied-out Arcs
        registry.remove("a").unwrap();
        assert_eq!(stores.len(), 2);
    }
}

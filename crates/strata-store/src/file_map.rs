//! Name → entry registry.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::entry::FileEntry;

/// Thread-safe mapping from blob name to its [`FileEntry`].
///
/// Guarantees at most one entry per name: `load_or_store` is atomic. The map
/// does not serialize operations on the entries it holds.
pub trait FileMap: Send + Sync + fmt::Debug {
    fn load(&self, name: &str) -> Option<Arc<FileEntry>>;

    /// Return the registered entry, or register `entry`.
    ///
    /// The flag is true when an existing entry was returned.
    fn load_or_store(&self, name: &str, entry: Arc<FileEntry>) -> (Arc<FileEntry>, bool);

    fn delete(&self, name: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`FileMap`] over a sharded concurrent hash map.
#[derive(Debug, Default)]
pub struct DashFileMap {
    entries: DashMap<String, Arc<FileEntry>>,
}

impl DashFileMap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileMap for DashFileMap {
    fn load(&self, name: &str) -> Option<Arc<FileEntry>> {
        self.entries.get(name).map(|e| Arc::clone(e.value()))
    }

    fn load_or_store(&self, name: &str, entry: Arc<FileEntry>) -> (Arc<FileEntry>, bool) {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), true),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
                (entry, false)
            }
        }
    }

    fn delete(&self, name: &str) {
        self.entries.remove(name);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::internal::{FileEntryInternalFactory, LocalEntryFactory};
    use crate::metadata::MetadataRegistry;
    use crate::state::FileState;
    use rayon::prelude::*;
    use std::path::Path;

    fn entry(name: &str) -> Arc<FileEntry> {
        let factory =
            LocalEntryFactory::new(StoreConfig::default(), MetadataRegistry::new()).unwrap();
        let state = FileState::new("cache", "/nonexistent/cache");
        let internal = factory.create(Path::new("/nonexistent/cache"), name).unwrap();
        Arc::new(FileEntry::new(state, internal))
    }

    #[test]
    fn test_load_or_store_keeps_first() {
        let map = DashFileMap::new();
        let first = entry("abcd");
        let second = entry("abcd");

        let (stored, loaded) = map.load_or_store("abcd", Arc::clone(&first));
        assert!(!loaded);
        assert!(Arc::ptr_eq(&stored, &first));

        let (stored, loaded) = map.load_or_store("abcd", second);
        assert!(loaded);
        assert!(Arc::ptr_eq(&stored, &first));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_delete_then_load() {
        let map = DashFileMap::new();
        map.load_or_store("abcd", entry("abcd"));
        assert!(map.load("abcd").is_some());

        map.delete("abcd");
        assert!(map.load("abcd").is_none());
        assert!(map.is_empty());

        // Deleting an absent name is a no-op
        map.delete("abcd");
    }

    #[test]
    fn test_concurrent_load_or_store_yields_one_entry() {
        let map = DashFileMap::new();
        let winners: Vec<Arc<FileEntry>> = (0..64)
            .into_par_iter()
            .map(|_| map.load_or_store("abcd", entry("abcd")).0)
            .collect();

        assert_eq!(map.len(), 1);
        let first = &winners[0];
        assert!(winners.iter().all(|w| Arc::ptr_eq(w, first)));
    }
}

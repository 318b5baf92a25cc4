//! Metadata registry associating data files with their metadata tables
//!
//! Every raw address list, scan result and filtered scan result produced by
//! the pipeline is linked to the metadata table describing its addresses.
//! The association lives in memory for the process and is optionally written
//! through to a JSON object on disk so later, independently invoked stages
//! can resolve it.
//!
//! The registry is constructed once per process and shared by reference
//! (usually behind an `Arc`) with every stage. A single mutex guards both the
//! in-memory map and the read-modify-write cycle against the store, and the
//! store is replaced atomically, so concurrent writers within one process
//! never lose entries.

use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Durable data-file to metadata-file association store
#[derive(Debug)]
pub struct MetadataRegistry {
    /// Location of the JSON store
    store_path: PathBuf,

    /// Associations keyed by absolute data-file path
    entries: Mutex<HashMap<String, String>>,
}

impl MetadataRegistry {
    /// Create a registry backed by the store at `store_path`
    ///
    /// Nothing is read until a lookup misses the in-memory map.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the on-disk store
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Number of associations held in memory
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Associate `data_path` with `metadata_path`
    ///
    /// The in-memory map is always updated. With `persist`, the store is
    /// loaded (an unreadable or corrupt store counts as empty), the key is set
    /// and the whole object is written back.
    pub fn set(&self, data_path: &Path, metadata_path: &Path, persist: bool) -> Result<()> {
        let key = absolute_key(data_path);
        let value = absolute_key(metadata_path);

        let mut entries = self.lock();
        entries.insert(key.clone(), value.clone());
        debug!("Registered {} -> {}", key, value);

        if persist {
            let mut stored = self.load_store();
            stored.insert(key, value);
            self.write_store(&stored)?;
        }

        Ok(())
    }

    /// Resolve the metadata path registered for `data_path`
    ///
    /// Checks memory first, then the on-disk store. Any failure reading the
    /// store is treated as the association being absent.
    pub fn get(&self, data_path: &Path) -> Option<PathBuf> {
        let key = absolute_key(data_path);

        let mut entries = self.lock();
        if let Some(value) = entries.get(&key) {
            return Some(PathBuf::from(value));
        }

        let value = self.load_store().remove(&key)?;
        entries.insert(key, value.clone());
        Some(PathBuf::from(value))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_store(&self) -> BTreeMap<String, String> {
        let content = match fs::read_to_string(&self.store_path) {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    "Registry store {} not readable: {}",
                    self.store_path.display(),
                    e
                );
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Ignoring unparseable registry store {}: {}",
                self.store_path.display(),
                e
            );
            BTreeMap::new()
        })
    }

    fn write_store(&self, stored: &BTreeMap<String, String>) -> Result<()> {
        let parent = match self.store_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| {
            Error::io(
                format!("Failed to create registry directory {}", parent.display()),
                e,
            )
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| Error::io("Failed to create temporary registry store", e))?;
        let json = serde_json::to_string_pretty(stored).map_err(|e| {
            Error::io(
                "Failed to serialize registry store",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        temp.write_all(json.as_bytes())
            .map_err(|e| Error::io("Failed to write registry store", e))?;

        temp.persist(&self.store_path).map_err(|e| {
            Error::io(
                format!(
                    "Failed to replace registry store {}",
                    self.store_path.display()
                ),
                e.error,
            )
        })?;

        Ok(())
    }
}

/// Absolute form of a path used as a registry key
///
/// Existing paths are canonicalized; paths that do not exist yet are made
/// absolute against the current directory.
pub fn absolute_key(path: &Path) -> String {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn test_set_and_get_in_memory() {
        let temp_dir = TempDir::new().unwrap();
        let registry = MetadataRegistry::new(temp_dir.path().join("map.json"));
        let data = touch(&temp_dir, "a.txt");
        let meta = touch(&temp_dir, "a.csv");

        registry.set(&data, &meta, false).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&data),
            Some(PathBuf::from(absolute_key(&meta)))
        );
        assert!(!registry.store_path().exists());
    }

    #[test]
    fn test_persisted_entry_survives_fresh_instance() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("run").join("map.json");
        let data = touch(&temp_dir, "a.txt");
        let meta = touch(&temp_dir, "a.csv");

        MetadataRegistry::new(&store).set(&data, &meta, true).unwrap();

        let fresh = MetadataRegistry::new(&store);
        assert!(fresh.is_empty());
        assert_eq!(fresh.get(&data), Some(PathBuf::from(absolute_key(&meta))));
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_persist_merges_with_existing_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("map.json");
        let first = touch(&temp_dir, "first.txt");
        let second = touch(&temp_dir, "second.txt");
        let meta = touch(&temp_dir, "meta.csv");

        MetadataRegistry::new(&store).set(&first, &meta, true).unwrap();
        MetadataRegistry::new(&store).set(&second, &meta, true).unwrap();

        let content = fs::read_to_string(&store).unwrap();
        let stored: BTreeMap<String, String> = serde_json::from_str(&content).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.contains_key(&absolute_key(&first)));
        assert!(stored.contains_key(&absolute_key(&second)));
    }

    #[test]
    fn test_corrupt_store_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("map.json");
        fs::write(&store, "{not json").unwrap();
        let data = touch(&temp_dir, "a.txt");
        let meta = touch(&temp_dir, "a.csv");

        let registry = MetadataRegistry::new(&store);
        assert_eq!(registry.get(&data), None);

        // A corrupt store is overwritten on the next persist
        registry.set(&data, &meta, true).unwrap();
        let fresh = MetadataRegistry::new(&store);
        assert!(fresh.get(&data).is_some());
    }

    #[test]
    fn test_missing_store_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let registry = MetadataRegistry::new(temp_dir.path().join("absent.json"));
        assert_eq!(registry.get(Path::new("/no/such/file.csv")), None);
    }

    #[test]
    fn test_concurrent_persisting_writers_keep_every_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("map.json");
        let registry = Arc::new(MetadataRegistry::new(&store));
        let meta = touch(&temp_dir, "meta.csv");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let data = temp_dir.path().join(format!("data_{}.txt", i));
                let meta = meta.clone();
                std::thread::spawn(move || registry.set(&data, &meta, true).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = fs::read_to_string(&store).unwrap();
        let stored: BTreeMap<String, String> = serde_json::from_str(&content).unwrap();
        assert_eq!(stored.len(), 16);
    }

    #[test]
    fn test_relative_and_absolute_paths_share_a_key() {
        let temp_dir = TempDir::new().unwrap();
        let data = touch(&temp_dir, "a.txt");
        let dotted = temp_dir.path().join(".").join("a.txt");
        assert_eq!(absolute_key(&data), absolute_key(&dotted));
    }
}

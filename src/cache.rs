//! Persistent lookup-result caching
//!
//! One cache file per lookup kind, serialized as a single JSON object of
//! address → record. Every mutation rewrites the whole document before
//! returning, so a killed process loses at most the in-flight lookups and
//! never a previously cached entry.

use crate::address::Address;
use crate::lookup::{LookupKind, LookupRecord};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Error type for cache persistence failures
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the cache file failed
    #[error("cache I/O failure on {path}: {source}")]
    Io {
        /// Path of the cache file involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The cache file exists but is not a valid JSON object
    #[error("cache file {path} is corrupt: {source}")]
    Corrupt {
        /// Path of the cache file involved
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Thread-safe, file-backed cache of lookup records keyed by address
///
/// An address appears at most once; [`LookupCache::insert`] is a no-op when
/// the address is already present (first write wins). Mutations persist the
/// full cache state before returning, serialized under the same lock as the
/// in-memory update.
pub struct LookupCache {
    path: PathBuf,
    inner: Mutex<HashMap<Address, LookupRecord>>,
}

impl LookupCache {
    /// Open (or create) the cache file at `path`
    ///
    /// A missing file is treated as an empty cache and created immediately;
    /// an unreadable or malformed file is an error rather than silent data
    /// loss.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| CacheError::Corrupt {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = HashMap::new();
                write_document(&path, &empty)?;
                empty
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    /// Open the conventional cache file for `kind` inside `dir`
    pub fn for_kind(dir: &Path, kind: LookupKind) -> Result<Self, CacheError> {
        Self::open(dir.join(kind.cache_file_name()))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff a record is stored for `addr`
    pub fn contains(&self, addr: &Address) -> bool {
        let entries = self.inner.lock().expect("mutex poisoned");
        entries.contains_key(addr)
    }

    /// Store a record for `addr` and persist, unless one is already present
    ///
    /// Returns `true` if the record was inserted, `false` if the address was
    /// already cached (in which case nothing is written). A failed persist
    /// rolls the in-memory insert back and surfaces the error.
    pub fn insert(&self, addr: Address, record: LookupRecord) -> Result<bool, CacheError> {
        let mut entries = self.inner.lock().expect("mutex poisoned");
        if entries.contains_key(&addr) {
            return Ok(false);
        }
        entries.insert(addr.clone(), record);
        if let Err(e) = write_document(&self.path, &entries) {
            entries.remove(&addr);
            return Err(e);
        }
        Ok(true)
    }

    /// Remove the record for `addr` and persist; no-op if absent
    pub fn remove(&self, addr: &Address) -> Result<bool, CacheError> {
        let mut entries = self.inner.lock().expect("mutex poisoned");
        match entries.remove(addr) {
            Some(record) => {
                if let Err(e) = write_document(&self.path, &entries) {
                    entries.insert(addr.clone(), record);
                    return Err(e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reset the cache to empty and persist immediately
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.inner.lock().expect("mutex poisoned");
        let drained = std::mem::take(&mut *entries);
        if let Err(e) = write_document(&self.path, &entries) {
            *entries = drained;
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot of all cached entries, for merging into a result mapping
    pub fn snapshot(&self) -> HashMap<Address, LookupRecord> {
        let entries = self.inner.lock().expect("mutex poisoned");
        entries.clone()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        let entries = self.inner.lock().expect("mutex poisoned");
        entries.len()
    }

    /// True if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        let entries = self.inner.lock().expect("mutex poisoned");
        entries.is_empty()
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

fn write_document(path: &Path, entries: &HashMap<Address, LookupRecord>) -> Result<(), CacheError> {
    let doc = serde_json::to_string(entries).map_err(|source| CacheError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, doc).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_open_creates_missing_file_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cached_geoip.json");
        assert!(!path.exists());

        let cache = LookupCache::open(&path).unwrap();
        assert!(cache.is_empty());
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_insert_is_first_write_wins() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::open(dir.path().join("c.json")).unwrap();

        let first = json!({"ip": "1.2.3.4", "country": "ES"});
        let second = json!({"ip": "1.2.3.4", "country": "DE"});

        assert!(cache.insert(addr("1.2.3.4"), first.clone()).unwrap());
        assert!(!cache.insert(addr("1.2.3.4"), second).unwrap());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.snapshot()[&addr("1.2.3.4")], first);
    }

    #[test]
    fn test_contains_remove_clear() {
        let dir = tempdir().unwrap();
        let cache = LookupCache::open(dir.path().join("c.json")).unwrap();

        cache.insert(addr("8.8.8.8"), json!({"x": 1})).unwrap();
        cache.insert(addr("1.1.1.1"), json!({"x": 2})).unwrap();
        assert!(cache.contains(&addr("8.8.8.8")));

        assert!(cache.remove(&addr("8.8.8.8")).unwrap());
        assert!(!cache.contains(&addr("8.8.8.8")));
        // Removing an absent address is a no-op
        assert!(!cache.remove(&addr("8.8.8.8")).unwrap());

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!cache.contains(&addr("1.1.1.1")));
    }

    #[test]
    fn test_round_trip_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");

        let record = json!({"ip": "40.82.106.5", "org": "example"});
        {
            let cache = LookupCache::open(&path).unwrap();
            cache.insert(addr("40.82.106.5"), record.clone()).unwrap();
        }

        // Simulated restart: reopen from disk
        let cache = LookupCache::open(&path).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&addr("40.82.106.5")));
        assert_eq!(cache.snapshot()[&addr("40.82.106.5")], record);
    }

    #[test]
    fn test_every_mutation_is_write_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        let cache = LookupCache::open(&path).unwrap();

        cache.insert(addr("10.0.0.1"), json!({"n": 1})).unwrap();
        let on_disk: HashMap<Address, LookupRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 1);

        cache.clear().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_corrupt_file_is_an_error_not_data_loss() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, "not json at all").unwrap();

        let err = LookupCache::open(&path).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
        // Original contents untouched
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json at all");
    }

    #[test]
    fn test_for_kind_uses_conventional_names() {
        let dir = tempdir().unwrap();
        let geo = LookupCache::for_kind(dir.path(), LookupKind::Geo).unwrap();
        let rdap = LookupCache::for_kind(dir.path(), LookupKind::Rdap).unwrap();
        assert!(geo.path().ends_with("cached_geoip.json"));
        assert!(rdap.path().ends_with("cached_rdap.json"));
    }
}

//! Key-value storage seam.
//!
//! The storage engine itself is an external collaborator; this module pins
//! down the few operations the serializer and job queues need, with a
//! sled-backed implementation for production and a shared in-memory map for
//! tests. Handles are cheap to clone — each durable structure owns one.

use skein_core::SkeinError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// An atomically applied group of puts and deletes.
#[derive(Default, Clone)]
pub struct Batch {
    pub(crate) ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl Batch {
    pub fn new() -> Batch {
        Batch::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), Some(value.into())));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), None));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Flat keyspace with atomic batched writes and prefix scans.
pub trait Database: Clone + Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SkeinError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), SkeinError>;

    fn delete(&self, key: &[u8]) -> Result<(), SkeinError>;

    /// Apply every operation in `batch` atomically: either all of them are
    /// visible after a crash, or none are.
    fn write(&self, batch: Batch) -> Result<(), SkeinError>;

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SkeinError>;
}

// ── MemDb ────────────────────────────────────────────────────────────────────

/// Shared in-memory database for tests. Clones see the same map, which lets
/// a test reopen state over the "same disk".
#[derive(Clone, Default)]
pub struct MemDb {
    map: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemDb {
    pub fn new() -> MemDb {
        MemDb::default()
    }
}

impl Database for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SkeinError> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), SkeinError> {
        self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), SkeinError> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    fn write(&self, batch: Batch) -> Result<(), SkeinError> {
        let mut map = self.map.lock().unwrap();
        for (key, value) in batch.ops {
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SkeinError> {
        let map = self.map.lock().unwrap();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ── SledDb ───────────────────────────────────────────────────────────────────

/// sled-backed database. One tree per chain keeps batched writes atomic.
#[derive(Clone)]
pub struct SledDb {
    _db: sled::Db,
    tree: sled::Tree,
}

impl SledDb {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SledDb, SkeinError> {
        let db = sled::open(path).map_err(|e| SkeinError::Storage(e.to_string()))?;
        let tree = db
            .open_tree("skein")
            .map_err(|e| SkeinError::Storage(e.to_string()))?;
        Ok(SledDb { _db: db, tree })
    }

    pub fn flush(&self) -> Result<(), SkeinError> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| SkeinError::Storage(e.to_string()))
    }
}

impl Database for SledDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SkeinError> {
        self.tree
            .get(key)
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(|e| SkeinError::Storage(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), SkeinError> {
        self.tree
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| SkeinError::Storage(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), SkeinError> {
        self.tree
            .remove(key)
            .map(|_| ())
            .map_err(|e| SkeinError::Storage(e.to_string()))
    }

    fn write(&self, batch: Batch) -> Result<(), SkeinError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch.ops {
            match value {
                Some(v) => sled_batch.insert(key, v),
                None => sled_batch.remove(key),
            }
        }
        self.tree
            .apply_batch(sled_batch)
            .map_err(|e| SkeinError::Storage(e.to_string()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SkeinError> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (k, v) = item.map_err(|e| SkeinError::Storage(e.to_string()))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

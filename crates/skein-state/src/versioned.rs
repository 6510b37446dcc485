//! Staged-write overlay over a `Database`.
//!
//! Mutations accumulate in memory and become visible to readers of this
//! handle immediately, but reach the base store only on `commit()` — as a
//! single atomic batch. A crash before commit therefore leaves the base
//! store exactly as it was, which is what keeps the DAG frontier free of
//! half-written updates.

use crate::kv::{Batch, Database};
use skein_core::SkeinError;
use std::collections::BTreeMap;

pub struct VersionedDb<D: Database> {
    base: D,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<D: Database> VersionedDb<D> {
    pub fn new(base: D) -> VersionedDb<D> {
        VersionedDb {
            base,
            pending: BTreeMap::new(),
        }
    }

    /// Read through the overlay: staged writes win over the base store.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SkeinError> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get(key),
        }
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.pending.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.pending.insert(key.into(), None);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flush every staged mutation to the base store atomically.
    pub fn commit(&mut self) -> Result<(), SkeinError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::new();
        for (key, value) in std::mem::take(&mut self.pending) {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            }
        }
        self.base.write(batch)
    }

    /// Discard staged mutations.
    pub fn abort(&mut self) {
        self.pending.clear();
    }

    /// Prefix scan over the base store merged with staged writes.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SkeinError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.scan_prefix(prefix)?.into_iter().collect();
        for (key, value) in self.pending.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn base(&self) -> &D {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemDb;

    #[test]
    fn staged_writes_invisible_until_commit() {
        let base = MemDb::new();
        let mut vdb = VersionedDb::new(base.clone());

        vdb.put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(vdb.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(base.get(b"k").unwrap(), None);

        vdb.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(!vdb.has_pending());
    }

    #[test]
    fn staged_delete_shadows_base() {
        let base = MemDb::new();
        base.put(b"k", b"v").unwrap();
        let mut vdb = VersionedDb::new(base.clone());

        vdb.delete(b"k".to_vec());
        assert_eq!(vdb.get(b"k").unwrap(), None);
        assert_eq!(base.get(b"k").unwrap(), Some(b"v".to_vec()));

        vdb.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), None);
    }

    #[test]
    fn abort_discards_everything() {
        let base = MemDb::new();
        let mut vdb = VersionedDb::new(base.clone());
        vdb.put(b"k".to_vec(), b"v".to_vec());
        vdb.abort();
        vdb.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), None);
    }

    #[test]
    fn scan_merges_overlay() {
        let base = MemDb::new();
        base.put(b"p/1", b"a").unwrap();
        base.put(b"p/2", b"b").unwrap();
        let mut vdb = VersionedDb::new(base);

        vdb.delete(b"p/1".to_vec());
        vdb.put(b"p/3".to_vec(), b"c".to_vec());

        let scanned = vdb.scan_prefix(b"p/").unwrap();
        let keys: Vec<_> = scanned.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"p/2".to_vec(), b"p/3".to_vec()]);
    }
}

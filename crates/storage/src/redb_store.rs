// Path: crates/storage/src/redb_store.rs
use ndid_api::storage::{KvStore, StorageError};
use ndid_telemetry::storage_metrics;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use std::path::Path;
use std::sync::Arc;

fn def(table: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(table)
}

fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    storage_metrics().inc_store_errors();
    StorageError::Backend(e.to_string())
}

/// A [`KvStore`] backed by a single redb database file.
#[derive(Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    /// Opens or creates the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(backend)?;
            }
        }
        let db = Database::create(path).map_err(backend)?;
        tracing::info!(target: "storage", path = %path.display(), "opened orchestration store");
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RedbKvStore {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = match r.open_table(def(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(backend(e)),
        };
        let value = t.get(key).map_err(backend)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut t = w.open_table(def(table)).map_err(backend)?;
            t.insert(key, value).map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        storage_metrics().inc_bytes_written(table, value.len() as u64);
        Ok(())
    }

    fn put_if_absent(&self, table: &str, key: &[u8], value: &[u8]) -> Result<bool, StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        let wrote = {
            let mut t = w.open_table(def(table)).map_err(backend)?;
            let exists = t.get(key).map_err(backend)?.is_some();
            if !exists {
                t.insert(key, value).map_err(backend)?;
            }
            !exists
        };
        w.commit().map_err(backend)?;
        if wrote {
            storage_metrics().inc_bytes_written(table, value.len() as u64);
        }
        Ok(wrote)
    }

    fn take(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        let old = {
            let mut t = w.open_table(def(table)).map_err(backend)?;
            let old = t.remove(key).map_err(backend)?.map(|v| v.value().to_vec());
            old
        };
        w.commit().map_err(backend)?;
        Ok(old)
    }

    fn scan_prefix(
        &self,
        table: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = match r.open_table(def(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(backend(e)),
        };
        let entries = t
            .range(prefix..)
            .map_err(backend)?
            .take_while(|r| r.as_ref().is_ok_and(|(k, _)| k.value().starts_with(prefix)))
            .map(|r| r.map(|(k, v)| (k.value().to_vec(), v.value().to_vec())))
            .collect::<Result<_, _>>()
            .map_err(backend)?;
        Ok(entries)
    }

    fn delete_prefix(&self, table: &str, prefix: &[u8]) -> Result<usize, StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        let removed = {
            let mut t = w.open_table(def(table)).map_err(backend)?;
            let keys_to_delete: Vec<Vec<u8>> = t
                .range(prefix..)
                .map_err(backend)?
                .take_while(|r| r.as_ref().is_ok_and(|(k, _)| k.value().starts_with(prefix)))
                .map(|r| r.map(|(k, _)| k.value().to_vec()))
                .collect::<Result<_, _>>()
                .map_err(backend)?;
            for key in &keys_to_delete {
                t.remove(key.as_slice()).map_err(backend)?;
            }
            keys_to_delete.len()
        };
        w.commit().map_err(backend)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.redb");
        {
            let store = RedbKvStore::open(&path).unwrap();
            store.put("t", b"a", b"1").unwrap();
        }
        let store = RedbKvStore::open(&path).unwrap();
        assert_eq!(store.get("t", b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn missing_table_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("x.redb")).unwrap();
        assert_eq!(store.get("nope", b"k").unwrap(), None);
        assert!(store.scan_prefix("nope", b"").unwrap().is_empty());
    }

    #[test]
    fn take_returns_value_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("x.redb")).unwrap();
        store.put("t", b"k", b"v").unwrap();
        assert_eq!(store.take("t", b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.take("t", b"k").unwrap(), None);
    }

    #[test]
    fn prefix_scan_and_delete_stay_within_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("x.redb")).unwrap();
        store.put("t", b"a/1", b"1").unwrap();
        store.put("t", b"a/2", b"2").unwrap();
        store.put("t", b"b/1", b"3").unwrap();
        let scanned = store.scan_prefix("t", b"a/").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"a/1".to_vec());
        assert_eq!(store.delete_prefix("t", b"a/").unwrap(), 2);
        assert_eq!(store.scan_prefix("t", b"").unwrap().len(), 1);
    }

    #[test]
    fn put_if_absent_keeps_first_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("x.redb")).unwrap();
        assert!(store.put_if_absent("t", b"k", b"first").unwrap());
        assert!(!store.put_if_absent("t", b"k", b"second").unwrap());
        assert_eq!(store.get("t", b"k").unwrap(), Some(b"first".to_vec()));
    }
}

// Path: crates/storage/src/memory.rs
use ndid_api::storage::{KvStore, StorageError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory [`KvStore`]. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_prefix<'a>(table: &'a Table, prefix: &'a [u8]) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> {
    table
        .range(prefix.to_vec()..)
        .take_while(move |(k, _)| k.starts_with(prefix))
}

impl KvStore for MemoryKvStore {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tables.lock().get(table).and_then(|t| t.get(key).cloned()))
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, table: &str, key: &[u8], value: &[u8]) -> Result<bool, StorageError> {
        let mut tables = self.tables.lock();
        let t = tables.entry(table.to_string()).or_default();
        if t.contains_key(key) {
            return Ok(false);
        }
        t.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn take(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tables.lock().get_mut(table).and_then(|t| t.remove(key)))
    }

    fn scan_prefix(
        &self,
        table: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let tables = self.tables.lock();
        Ok(tables
            .get(table)
            .map(|t| {
                in_prefix(t, prefix)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete_prefix(&self, table: &str, prefix: &[u8]) -> Result<usize, StorageError> {
        let mut tables = self.tables.lock();
        let Some(t) = tables.get_mut(table) else {
            return Ok(0);
        };
        let keys: Vec<Vec<u8>> = in_prefix(t, prefix).map(|(k, _)| k.clone()).collect();
        for k in &keys {
            t.remove(k);
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_table_store() {
        let store = MemoryKvStore::new();
        store.put("t", b"n1\0a", b"1").unwrap();
        store.put("t", b"n1\0b", b"2").unwrap();
        store.put("t", b"n2\0a", b"3").unwrap();
        assert_eq!(store.scan_prefix("t", b"n1\0").unwrap().len(), 2);
        assert_eq!(store.take("t", b"n1\0a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.take("t", b"n1\0a").unwrap(), None);
        assert!(!store.put_if_absent("t", b"n2\0a", b"x").unwrap());
        assert_eq!(store.delete_prefix("t", b"n2\0").unwrap(), 1);
        assert_eq!(store.delete_prefix("other", b"").unwrap(), 0);
    }
}

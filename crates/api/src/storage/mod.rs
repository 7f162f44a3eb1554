// Path: crates/api/src/storage/mod.rs

//! API for the durable store backing all orchestration state.

use thiserror::Error;

/// Encodes a u64 into a big-endian byte array, suitable for ordered key scans.
#[inline]
pub fn be64(x: u64) -> [u8; 8] {
    x.to_be_bytes()
}

/// Represents errors that can occur within the durable storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A generic error originating from the underlying key-value store backend (e.g., redb).
    #[error("backend error: {0}")]
    Backend(String),
    /// An error occurred while serializing data for storage.
    #[error("encode error: {0}")]
    Encode(String),
    /// An error occurred while deserializing data from storage.
    #[error("decode error: {0}")]
    Decode(String),
    /// The requested key or item was not found in the store.
    #[error("not found")]
    NotFound,
}

impl ndid_types::error::ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Encode(_) => "STORAGE_ENCODE_ERROR",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
            Self::NotFound => "STORAGE_NOT_FOUND",
        }
    }
}

/// A key-value store organised in named tables.
///
/// Every method is a single atomic transaction. Keys within a table are
/// ordered bytewise, so big-endian integers in keys scan in numeric order.
pub trait KvStore: Send + Sync {
    /// Reads one value.
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Writes one value, replacing any previous one.
    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Writes one value unless the key already exists. Returns whether it wrote.
    fn put_if_absent(&self, table: &str, key: &[u8], value: &[u8]) -> Result<bool, StorageError>;

    /// Removes one key and returns the value it held.
    ///
    /// Exactly one of several concurrent callers observes `Some`.
    fn take(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Removes one key. Returns whether it existed.
    fn delete(&self, table: &str, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.take(table, key)?.is_some())
    }

    /// Returns every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        table: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Removes every entry whose key starts with `prefix`. Returns how many were removed.
    fn delete_prefix(&self, table: &str, prefix: &[u8]) -> Result<usize, StorageError>;
}

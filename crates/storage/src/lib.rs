// Path: crates/storage/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Durable storage for all orchestration state of an NDID node.
//!
//! Two [`KvStore`](ndid_api::storage::KvStore) backends are provided: a redb
//! database on disk and an in-memory map for tests and embedding. The typed
//! [`OrchestrationStore`] sits on top and prefixes every key with the owning
//! node id, so several nodes hosted in one process never share a key.

pub mod keys;
pub mod memory;
pub mod orchestration;
pub mod redb_store;

pub use memory::MemoryKvStore;
pub use orchestration::OrchestrationStore;
pub use redb_store::RedbKvStore;

// Path: crates/client/src/lib.rs
//! # NDID Client Crate Lints
//!
//! Panics are disallowed in non-test code.
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

//! # NDID Client
//!
//! Wraps a [`LedgerBackend`](ndid_api::ledger::LedgerBackend) with what every
//! node needs on top of raw transact and query: signed payloads with a fresh
//! nonce, a durable registry of transactions awaiting commit, commit waiters,
//! query retries and the latest observed block height.

pub mod ledger_client;

pub use ledger_client::{ClientError, LedgerClient};

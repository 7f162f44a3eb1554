// Path: crates/api/src/lib.rs

//! # NDID API Crate Lints
//!
//! This crate enforces a strict set of lints to ensure panic-free,
//! well-documented code. Panics are disallowed in non-test code.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! # NDID API
//!
//! Trait seams between the orchestration engine and everything it does not
//! own: the ledger, the peer transport, the durable key-value store, the node
//! signer, client callback delivery and wall-clock time.

/// Outbound client callback delivery.
pub mod callback;
/// Node signing keys, local or delegated.
pub mod crypto;
/// Re-exports the core error types from `ndid-types`.
pub mod error;
/// The ledger backend contract.
pub mod ledger;
/// A durable, table-oriented key-value store.
pub mod storage;
/// Wall-clock time.
pub mod time;
/// The point-to-point peer transport contract.
pub mod transport;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::callback::{CallbackReply, CallbackSender, DeliveryError};
    pub use crate::crypto::NodeSigner;
    pub use crate::error::{CryptoError, ErrorClass, ErrorCode, IntegrityError, RequestError};
    pub use crate::ledger::{LedgerBackend, LedgerError};
    pub use crate::storage::{KvStore, StorageError};
    pub use crate::time::{Clock, SystemClock};
    pub use crate::transport::{DeliveryOutcome, PeerTransport, TransportError};
}

// Path: crates/test_utils/src/lib.rs
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

//! # NDID Test Utilities
//!
//! In-memory doubles for every collaborator of the engine (ledger, peer
//! transport, callback receiver, clock) and RSA key fixtures.

pub mod assertions;
pub mod callback;
pub mod clock;
pub mod fixtures;
pub mod ledger;
pub mod transport;

pub use callback::RecordingCallbackSender;
pub use clock::ManualClock;
pub use ledger::FakeLedger;
pub use transport::LoopbackTransport;

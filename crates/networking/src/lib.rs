// Path: crates/networking/src/lib.rs
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

//! # NDID Peer Codec
//!
//! Encodes [`PeerMessage`](ndid_types::app::PeerMessage)s for the peer
//! transport. Most messages travel as JSON. Consent requests and AS data
//! responses use a compact frame: a SCALE body, zstd-compressed above a size
//! threshold, with large AS data split into a trailing raw segment.

pub mod codec;
pub mod wire;

pub use codec::{CodecError, PeerCodec};

// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # NDID Types
//!
//! This crate is the foundational library for an NDID node, containing the
//! request data model, the messages exchanged between RP, IdP and AS nodes,
//! the payloads of every ledger function the engine calls, configuration
//! structures and the error taxonomy.
//!
//! ## Architectural Role
//!
//! As the base crate, `ndid-types` has minimal dependencies and is itself a
//! dependency for every other crate in the workspace. This prevents circular
//! dependencies and gives a single canonical definition for shared types like
//! `RequestDetail`, `PeerMessage` and `Continuation`.

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::RequestError> = std::result::Result<T, E>;

/// Request, message, ledger and callback data structures.
pub mod app;
/// Node configuration structures loaded from `node.toml`.
pub mod config;
/// The error taxonomy shared across the workspace.
pub mod error;

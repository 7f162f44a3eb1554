// Path: crates/crypto/src/error.rs
//! Local error types for the `ndid-crypto` crate.

// Re-export the canonical error type from the API crate.
pub use ndid_api::error::CryptoError;

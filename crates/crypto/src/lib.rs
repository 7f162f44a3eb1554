// Path: crates/crypto/src/lib.rs
//! # NDID Crypto Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # NDID Cryptography
//!
//! SHA-256 helpers, RSA PKCS#1 v1.5 signing and verification, the node
//! signers (local key or external service), and the RSA-based
//! zero-knowledge consent proof.

pub mod algorithms;
pub mod error;
pub mod sign;
pub mod zkp;

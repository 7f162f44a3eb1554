// Path: crates/crypto/src/algorithms/mod.rs
//! Hashing and encoding primitives.

pub mod hash;

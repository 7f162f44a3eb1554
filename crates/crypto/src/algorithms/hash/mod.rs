// Path: crates/crypto/src/algorithms/hash/mod.rs
//! SHA-256 helpers for everything the engine commits to the ledger.

use crate::error::CryptoError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ndid_types::app::Identity;
use sha2::{Digest, Sha256};

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hex digest of `value || salt`, the form in which request messages,
/// request parameters and data are committed on chain.
pub fn salted_hash_hex(value: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// The hashed subject reference `sha256(namespace:identifier)`.
pub fn hash_subject(identity: &Identity) -> [u8; 32] {
    sha256(identity.canonical().as_bytes())
}

/// Standard base64 encoding.
pub fn b64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Standard base64 decoding.
pub fn unb64(data: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(data)
        .map_err(|e| CryptoError::Decode(e.to_string()))
}

/// Fresh random salt, hex encoded.
pub fn random_salt(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests;

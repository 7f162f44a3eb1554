// Path: crates/crypto/src/sign/pkcs1/mod.rs
//! RSA-SHA256 (PKCS#1 v1.5) over PEM-encoded keys.

use crate::error::CryptoError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Parses a private key in either PKCS#8 or PKCS#1 PEM form.
pub fn parse_private_pem(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Signs `sha256(message)` with PKCS#1 v1.5 padding.
pub fn sign_sha256(key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let digest = Sha256::digest(message);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| CryptoError::Signing(e.to_string()))
}

/// An RSA public key as registered on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublic {
    key: RsaPublicKey,
}

impl RsaPublic {
    /// Parses a public key in either SPKI or PKCS#1 PEM form.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Wraps an already parsed key.
    pub fn from_key(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Big-endian modulus bytes.
    pub fn modulus_be(&self) -> Vec<u8> {
        self.key.n().to_bytes_be()
    }

    /// Big-endian public exponent bytes.
    pub fn exponent_be(&self) -> Vec<u8> {
        self.key.e().to_bytes_be()
    }

    /// Modulus length in bytes.
    pub fn size(&self) -> usize {
        self.key.size()
    }

    /// Verifies a PKCS#1 v1.5 signature over `sha256(message)`.
    pub fn verify_sha256(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let digest = Sha256::digest(message);
        self.key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Verifies `signature` over `message` against a PEM public key.
pub fn verify_sha256(public_pem: &str, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    RsaPublic::from_pem(public_pem)?.verify_sha256(message, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    fn keypair() -> (RsaPrivateKey, String) {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        (key, pem)
    }

    #[test]
    fn sign_then_verify() {
        let (key, pem) = keypair();
        let sig = sign_sha256(&key, b"consent").unwrap();
        assert_eq!(sig.len(), 128);
        verify_sha256(&pem, b"consent", &sig).unwrap();
        assert_eq!(
            verify_sha256(&pem, b"other", &sig),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn garbage_pem_is_invalid_key() {
        assert!(matches!(
            RsaPublic::from_pem("not a key"),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            parse_private_pem("not a key"),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}

// Path: crates/crypto/src/sign/local.rs
//! A signer holding the node's private key in memory.

use super::pkcs1::{parse_private_pem, sign_sha256};
use crate::error::CryptoError;
use async_trait::async_trait;
use ndid_api::crypto::NodeSigner;
use ndid_types::app::NodeId;
use rsa::RsaPrivateKey;

/// Signs with a locally held RSA key.
pub struct LocalSigner {
    node_id: NodeId,
    key: RsaPrivateKey,
}

impl LocalSigner {
    /// Wraps a parsed key.
    pub fn new(node_id: NodeId, key: RsaPrivateKey) -> Self {
        Self { node_id, key }
    }

    /// Parses a PEM private key.
    pub fn from_pem(node_id: NodeId, pem: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(node_id, parse_private_pem(pem)?))
    }
}

#[async_trait]
impl NodeSigner for LocalSigner {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        sign_sha256(&self.key, message)
    }
}

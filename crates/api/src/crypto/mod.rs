// Path: crates/api/src/crypto/mod.rs

//! The signing identity of a node.

use async_trait::async_trait;
use ndid_types::app::NodeId;
use ndid_types::error::CryptoError;

/// Produces RSA-SHA256 (PKCS#1 v1.5) signatures with the node's registered key.
///
/// Implementations either hold the private key locally or delegate to an
/// external signing service.
#[async_trait]
pub trait NodeSigner: Send + Sync {
    /// The node whose key this signer uses.
    fn node_id(&self) -> &NodeId;

    /// Signs `message`, hashing it with SHA-256 first.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

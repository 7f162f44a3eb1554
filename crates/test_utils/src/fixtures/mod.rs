// Path: crates/test_utils/src/fixtures/mod.rs
//! RSA key fixtures and the registry entries built from them.
//!
//! The keys are 1024-bit so debug-mode tests stay fast. They are test
//! material only.

use anyhow::{anyhow, Result};
use ndid_crypto::algorithms::hash::b64;
use ndid_crypto::sign::pkcs1::{parse_private_pem, sign_sha256};
use ndid_crypto::sign::LocalSigner;
use ndid_types::app::{AccessorInfo, NodeId, NodeInfo, Role};
use std::sync::Arc;

/// Names of the bundled keys.
pub const KEY_NAMES: [&str; 6] = ["rp1", "idp1", "idp2", "as1", "accessor1", "accessor2"];

/// The PKCS#8 private key PEM of a bundled key.
pub fn private_pem(name: &str) -> Result<&'static str> {
    Ok(match name {
        "rp1" => include_str!("../../fixtures/keys/rp1.pem"),
        "idp1" => include_str!("../../fixtures/keys/idp1.pem"),
        "idp2" => include_str!("../../fixtures/keys/idp2.pem"),
        "as1" => include_str!("../../fixtures/keys/as1.pem"),
        "accessor1" => include_str!("../../fixtures/keys/accessor1.pem"),
        "accessor2" => include_str!("../../fixtures/keys/accessor2.pem"),
        other => return Err(anyhow!("no key fixture named {other}")),
    })
}

/// The SPKI public key PEM of a bundled key.
pub fn public_pem(name: &str) -> Result<&'static str> {
    Ok(match name {
        "rp1" => include_str!("../../fixtures/keys/rp1.pub.pem"),
        "idp1" => include_str!("../../fixtures/keys/idp1.pub.pem"),
        "idp2" => include_str!("../../fixtures/keys/idp2.pub.pem"),
        "as1" => include_str!("../../fixtures/keys/as1.pub.pem"),
        "accessor1" => include_str!("../../fixtures/keys/accessor1.pub.pem"),
        "accessor2" => include_str!("../../fixtures/keys/accessor2.pub.pem"),
        other => return Err(anyhow!("no key fixture named {other}")),
    })
}

/// A node signer using the key of the same name.
pub fn signer(node: &str) -> Result<Arc<LocalSigner>> {
    Ok(Arc::new(LocalSigner::from_pem(
        NodeId::from(node),
        private_pem(node)?,
    )?))
}

/// A registry entry for `node` listening on loopback `port`.
pub fn node_info(node: &str, role: Role, port: u16) -> Result<NodeInfo> {
    Ok(NodeInfo {
        node_id: NodeId::from(node),
        role,
        public_key: public_pem(node)?.to_string(),
        ip: Some("127.0.0.1".into()),
        port: Some(port),
        max_ial: 3.0,
        max_aal: 3.0,
        active: true,
    })
}

/// An active accessor backed by the key `key_name`.
pub fn accessor_info(accessor_id: &str, key_name: &str) -> Result<AccessorInfo> {
    Ok(AccessorInfo {
        accessor_id: accessor_id.to_string(),
        accessor_public_key: public_pem(key_name)?.to_string(),
        active: true,
    })
}

/// Base64 RSA-SHA256 signature of `message` with the key `key_name`.
///
/// Signing the request message gives a mode-2/3 consent signature; signing
/// `namespace:identifier` gives the mode-3 secret.
pub fn sign_b64(key_name: &str, message: &[u8]) -> Result<String> {
    let key = parse_private_pem(private_pem(key_name)?)?;
    Ok(b64(&sign_sha256(&key, message)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_crypto::sign::verify_sha256;

    #[test]
    fn every_bundled_pair_matches() {
        for name in KEY_NAMES {
            let sig = sign_b64(name, b"fixture").unwrap();
            let raw = ndid_crypto::algorithms::hash::unb64(&sig).unwrap();
            verify_sha256(public_pem(name).unwrap(), b"fixture", &raw).unwrap();
        }
    }

    #[test]
    fn unknown_names_are_errors() {
        assert!(private_pem("nobody").is_err());
        assert!(node_info("nobody", Role::Rp, 1).is_err());
    }
}

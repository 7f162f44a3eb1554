// Path: crates/client/src/ledger_client/payload.rs

//! The signed transaction payload.
//!
//! ```text
//! fn_name | base64(json(args)) | nonce | base64(signature) | base64(node_id)
//! ```
//!
//! The signature covers the first three fields joined by `|`. The
//! transaction hash is the hex SHA-256 of the whole payload.

use ndid_api::crypto::NodeSigner;
use ndid_api::ledger::LedgerError;
use ndid_crypto::algorithms::hash::{b64, sha256_hex};
use ndid_types::app::{LedgerFunction, TxHash};

/// A payload ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub bytes: Vec<u8>,
    pub tx_hash: TxHash,
}

/// The part of the payload the node signs.
pub fn signing_input(function: LedgerFunction, args_json: &[u8], nonce: &str) -> String {
    format!("{}|{}|{}", function.as_str(), b64(args_json), nonce)
}

pub(crate) async fn build(
    signer: &dyn NodeSigner,
    function: LedgerFunction,
    args: &serde_json::Value,
    nonce: &str,
) -> Result<SignedPayload, LedgerError> {
    let args_json = serde_json::to_vec(args).map_err(|e| LedgerError::Decode(e.to_string()))?;
    let input = signing_input(function, &args_json, nonce);
    let signature = signer
        .sign(input.as_bytes())
        .await
        .map_err(|e| LedgerError::Signing(e.to_string()))?;
    let payload = format!(
        "{}|{}|{}",
        input,
        b64(&signature),
        b64(signer.node_id().as_str().as_bytes())
    );
    let tx_hash = TxHash(sha256_hex(payload.as_bytes()));
    Ok(SignedPayload {
        bytes: payload.into_bytes(),
        tx_hash,
    })
}

// Path: crates/crypto/src/sign/external.rs
//! A signer that delegates to an HTTP signing service.

use crate::algorithms::hash::{b64, sha256, unb64};
use crate::error::CryptoError;
use async_trait::async_trait;
use ndid_api::crypto::NodeSigner;
use ndid_types::app::NodeId;
use ndid_types::config::ExternalSignerConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct SignRequest<'a> {
    node_id: &'a str,
    request_message: String,
    request_message_hash: String,
    hash_method: &'static str,
    key_type: &'static str,
    sign_method: &'static str,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

/// Posts each message to an external service that holds the node key.
pub struct HttpExternalSigner {
    node_id: NodeId,
    client: Client,
    url: String,
}

impl HttpExternalSigner {
    /// Builds a signer from its configuration section.
    pub fn new(node_id: NodeId, config: &ExternalSignerConfig) -> Result<Self, CryptoError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CryptoError::ExternalSigner(e.to_string()))?;
        Ok(Self {
            node_id,
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl NodeSigner for HttpExternalSigner {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let body = SignRequest {
            node_id: self.node_id.as_str(),
            request_message: b64(message),
            request_message_hash: b64(&sha256(message)),
            hash_method: "SHA256",
            key_type: "RSA",
            sign_method: "RSA-SHA256",
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CryptoError::ExternalSigner(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CryptoError::ExternalSigner(format!(
                "signing service returned {}",
                resp.status()
            )));
        }
        let parsed: SignResponse = resp
            .json()
            .await
            .map_err(|e| CryptoError::ExternalSigner(e.to_string()))?;
        unb64(&parsed.signature)
    }
}

// Path: crates/api/src/callback/http.rs

use super::{CallbackReply, CallbackSender, DeliveryError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Delivers callbacks as HTTP POST requests with a JSON body.
pub struct HttpCallbackSender {
    client: Client,
}

impl HttpCallbackSender {
    /// Builds a sender whose attempts time out after `attempt_timeout`.
    pub fn new(attempt_timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(|e| DeliveryError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<CallbackReply, DeliveryError> {
        let resp = self.client.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Http(e.to_string())
            }
        })?;
        let status = resp.status().as_u16();
        // Clients are free to answer with an empty or non-JSON body.
        let body = match resp.bytes().await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).ok(),
            _ => None,
        };
        Ok(CallbackReply { status, body })
    }
}

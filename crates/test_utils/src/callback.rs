// Path: crates/test_utils/src/callback.rs
//! A callback receiver that records every post.

use async_trait::async_trait;
use ndid_api::callback::{CallbackReply, CallbackSender, DeliveryError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

type Scripted = VecDeque<Result<CallbackReply, DeliveryError>>;

/// Records `(url, body)` pairs and answers `200` unless a reply was scripted.
#[derive(Debug, Default)]
pub struct RecordingCallbackSender {
    posts: Mutex<Vec<(String, Value)>>,
    scripted: Mutex<HashMap<String, Scripted>>,
}

impl RecordingCallbackSender {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the next post to `url`. Replies are used in order.
    pub fn script(&self, url: &str, reply: Result<CallbackReply, DeliveryError>) {
        self.scripted
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queues `n` failing attempts for `url`.
    pub fn fail_next(&self, url: &str, n: usize) {
        for _ in 0..n {
            self.script(url, Err(DeliveryError::Http("connection refused".into())));
        }
    }

    /// Every post so far, in order.
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().clone()
    }

    /// Bodies whose `type` field equals `kind`.
    pub fn bodies_of_type(&self, kind: &str) -> Vec<Value> {
        self.posts
            .lock()
            .iter()
            .filter(|(_, body)| body.get("type").and_then(Value::as_str) == Some(kind))
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// Bodies posted to `url`.
    pub fn bodies_to(&self, url: &str) -> Vec<Value> {
        self.posts
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl CallbackSender for RecordingCallbackSender {
    async fn post(&self, url: &str, body: &Value) -> Result<CallbackReply, DeliveryError> {
        self.posts.lock().push((url.to_string(), body.clone()));
        let scripted = self
            .scripted
            .lock()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or(Ok(CallbackReply {
            status: 200,
            body: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_replies_run_out_into_success() {
        let sender = RecordingCallbackSender::new();
        sender.fail_next("http://rp/cb", 1);

        let body = json!({ "type": "request_status" });
        assert!(sender.post("http://rp/cb", &body).await.is_err());
        assert!(sender.post("http://rp/cb", &body).await.unwrap().is_success());
        assert_eq!(sender.bodies_of_type("request_status").len(), 2);
        assert!(sender.bodies_to("http://other").is_empty());
    }
}

// Path: crates/api/src/callback/mod.rs

//! Delivery of JSON callbacks to client applications.

use async_trait::async_trait;
use ndid_types::error::ErrorCode;
use thiserror::Error;

pub mod http;
pub use http::HttpCallbackSender;

/// The client's answer to one callback attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReply {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, if the client sent one.
    pub body: Option<serde_json::Value>,
}

impl CallbackReply {
    /// Any 2xx status counts as delivered.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A callback attempt that did not produce a reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connection or protocol failure.
    #[error("callback HTTP error: {0}")]
    Http(String),
    /// The attempt exceeded its timeout.
    #[error("callback attempt timed out")]
    Timeout,
}

impl ErrorCode for DeliveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "CALLBACK_HTTP_ERROR",
            Self::Timeout => "CALLBACK_TIMEOUT",
        }
    }
}

/// Posts one callback body to one URL.
#[async_trait]
pub trait CallbackSender: Send + Sync {
    /// Makes a single delivery attempt.
    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<CallbackReply, DeliveryError>;
}

// Path: crates/api/src/transport/mod.rs

//! The point-to-point peer transport contract.

use async_trait::async_trait;
use ndid_types::app::PeerAddress;
use ndid_types::error::ErrorCode;
use thiserror::Error;

/// Final outcome of an at-least-once send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The receiver acknowledged the payload.
    Delivered,
    /// The transport exhausted its own retries.
    GaveUp,
}

/// Errors raised before the transport could attempt delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The destination address is unusable.
    #[error("invalid destination {0}")]
    InvalidDestination(String),
    /// A local I/O failure.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidDestination(_) => "TRANSPORT_INVALID_DESTINATION",
            Self::Io(_) => "TRANSPORT_IO_ERROR",
        }
    }
}

/// Delivers opaque payloads to other nodes.
///
/// The sender retries with backoff until the receiver acknowledges or the
/// transport gives up. Receivers may see the same payload more than once and
/// in any order.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Sends `payload` to `destination`.
    async fn send(
        &self,
        destination: &PeerAddress,
        payload: Vec<u8>,
    ) -> Result<DeliveryOutcome, TransportError>;
}

/// Formats an address for logs.
pub fn describe(destination: &PeerAddress) -> String {
    format!("{}@{}:{}", destination.node_id, destination.ip, destination.port)
}

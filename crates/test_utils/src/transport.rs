// Path: crates/test_utils/src/transport.rs
//! An in-process peer transport.

use async_trait::async_trait;
use dashmap::DashMap;
use ndid_api::transport::{DeliveryOutcome, PeerTransport, TransportError};
use ndid_types::app::{NodeId, PeerAddress};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Routes payloads to receivers attached by `ip:port`.
///
/// With duplication on, every payload is delivered twice to exercise
/// receiver idempotency.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    routes: DashMap<(String, u16), mpsc::UnboundedSender<Vec<u8>>>,
    duplicate: AtomicBool,
    sent: Mutex<Vec<(NodeId, Vec<u8>)>>,
}

impl LoopbackTransport {
    /// A transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts receiving payloads sent to `address`.
    pub fn attach(&self, address: &PeerAddress) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert((address.ip.clone(), address.port), tx);
        rx
    }

    /// Stops delivering to `address`; later sends give up.
    pub fn detach(&self, address: &PeerAddress) {
        self.routes.remove(&(address.ip.clone(), address.port));
    }

    /// Delivers every payload twice while on.
    pub fn set_duplicate(&self, on: bool) {
        self.duplicate.store(on, Ordering::SeqCst);
    }

    /// Every payload handed to the transport, by destination node.
    pub fn sent(&self) -> Vec<(NodeId, Vec<u8>)> {
        self.sent.lock().clone()
    }

    /// Number of payloads sent to `node`.
    pub fn sent_to(&self, node: &NodeId) -> usize {
        self.sent.lock().iter().filter(|(n, _)| n == node).count()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn send(
        &self,
        destination: &PeerAddress,
        payload: Vec<u8>,
    ) -> Result<DeliveryOutcome, TransportError> {
        if destination.ip.is_empty() {
            return Err(TransportError::InvalidDestination(destination.node_id.to_string()));
        }
        self.sent
            .lock()
            .push((destination.node_id.clone(), payload.clone()));
        let Some(route) = self
            .routes
            .get(&(destination.ip.clone(), destination.port))
            .map(|r| r.clone())
        else {
            return Ok(DeliveryOutcome::GaveUp);
        };
        if self.duplicate.load(Ordering::SeqCst) && route.send(payload.clone()).is_err() {
            return Ok(DeliveryOutcome::GaveUp);
        }
        match route.send(payload) {
            Ok(()) => Ok(DeliveryOutcome::Delivered),
            Err(_) => Ok(DeliveryOutcome::GaveUp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(port: u16) -> PeerAddress {
        PeerAddress {
            node_id: NodeId::from("idp1"),
            ip: "127.0.0.1".into(),
            port,
            public_key: String::new(),
        }
    }

    #[tokio::test]
    async fn delivers_to_attached_route_and_duplicates_on_demand() {
        let transport = LoopbackTransport::new();
        let mut rx = transport.attach(&address(9001));
        transport.set_duplicate(true);

        let outcome = transport.send(&address(9001), b"hi".to_vec()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap(), b"hi");
        assert_eq!(rx.recv().await.unwrap(), b"hi");
        assert_eq!(transport.sent_to(&NodeId::from("idp1")), 1);
    }

    #[tokio::test]
    async fn unknown_route_gives_up() {
        let transport = LoopbackTransport::new();
        let outcome = transport.send(&address(9002), vec![1]).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::GaveUp);
    }
}

// Path: crates/engine/src/context.rs
//! Everything one node's operations share.

use crate::callback::CallbackQueue;
use crate::error::{EngineError, StageExt};
use crate::lock::RequestLocks;
use crate::request::RequestStatusReport;
use crate::timeout::TimeoutScheduler;
use ndid_api::crypto::NodeSigner;
use ndid_api::time::Clock;
use ndid_api::transport::{describe, DeliveryOutcome, PeerTransport};
use ndid_client::LedgerClient;
use ndid_networking::PeerCodec;
use ndid_storage::OrchestrationStore;
use ndid_types::app::{
    CallbackBody, CallbackError, NodeId, PeerMessage, RequestDetail, RequestId, RequestRecord, Role,
};
use ndid_types::config::NodeConfig;
use ndid_types::error::{ErrorCode, RequestError};
use std::sync::Arc;

/// The per-node context handed to every operation.
///
/// Node-level settings live in the store and change only through the
/// setters here, so concurrent operations always read a persisted value.
pub struct NodeContext {
    pub(crate) config: NodeConfig,
    pub(crate) store: OrchestrationStore,
    pub(crate) ledger: Arc<LedgerClient>,
    pub(crate) signer: Arc<dyn NodeSigner>,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) codec: PeerCodec,
    pub(crate) callbacks: CallbackQueue,
    pub(crate) timeouts: TimeoutScheduler,
    pub(crate) locks: RequestLocks,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.config.node_id)
            .field("role", &self.config.role)
            .field("callbacks", &self.callbacks)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub(crate) fn ensure_role(&self, role: Role, operation: &str) -> Result<(), RequestError> {
        if self.role() == role {
            Ok(())
        } else {
            Err(RequestError::WrongRole(format!(
                "{operation} needs a {role} node, this is a {}",
                self.role()
            )))
        }
    }

    /// Sets where IdP `incoming_request` callbacks are posted.
    pub fn set_incoming_request_url(&self, url: &str) -> Result<(), EngineError> {
        self.ensure_role(Role::Idp, "set_incoming_request_url")?;
        let mut urls = self.store.callback_urls()?;
        urls.incoming_request_url = Some(url.to_string());
        self.store.set_callback_urls(&urls)?;
        tracing::info!(target: "engine", url, "incoming request callback url set");
        Ok(())
    }

    /// Sets where AS `data_request` callbacks for `service_id` are posted.
    pub fn set_data_request_url(&self, service_id: &str, url: &str) -> Result<(), EngineError> {
        self.ensure_role(Role::As, "set_data_request_url")?;
        let mut urls = self.store.callback_urls()?;
        urls.data_request_urls
            .insert(service_id.to_string(), url.to_string());
        self.store.set_callback_urls(&urls)?;
        tracing::info!(target: "engine", service_id, url, "data request callback url set");
        Ok(())
    }

    /// Encodes `message` and hands it to the transport.
    pub(crate) async fn send_to(
        &self,
        stage: &'static str,
        node: &NodeId,
        message: &PeerMessage,
    ) -> Result<(), EngineError> {
        let request_id = message.request_id();
        let transport_error = |reason: String| EngineError::Transport {
            stage,
            node: node.clone(),
            reason,
        };
        let address = self
            .ledger
            .peer_address(node)
            .await
            .at(stage, request_id)?
            .ok_or_else(|| transport_error("no registered address".into()))?;
        let payload = self.codec.encode(message)?;
        let size = payload.len();
        match self.transport.send(&address, payload).await {
            Ok(DeliveryOutcome::Delivered) => {
                tracing::debug!(
                    target: "engine",
                    request_id = %request_id,
                    kind = message.kind(),
                    to = %describe(&address),
                    size,
                    "sent"
                );
                Ok(())
            }
            Ok(DeliveryOutcome::GaveUp) => Err(transport_error("transport gave up".into())),
            Err(e) => Err(transport_error(e.to_string())),
        }
    }

    /// Queues a callback that is delivered regardless of request state.
    pub(crate) fn post(&self, url: &str, body: CallbackBody) -> Result<(), EngineError> {
        self.callbacks.enqueue(url, body, None, None)?;
        Ok(())
    }

    /// Queues a `request_status` callback for the RP client.
    pub(crate) fn post_status(
        &self,
        record: &RequestRecord,
        detail: &RequestDetail,
    ) -> Result<(), EngineError> {
        let report = RequestStatusReport::new(detail, Some(record), self.ledger.latest_height());
        tracing::debug!(
            target: "engine",
            request_id = %record.request_id,
            status = %report.status,
            closed = report.closed,
            timed_out = report.timed_out,
            "status changed"
        );
        self.post(&record.callback_url, report.into_callback())
    }

    /// Reads a request from the ledger and fails unless it is still open.
    pub(crate) async fn open_request(
        &self,
        stage: &'static str,
        request_id: &RequestId,
    ) -> Result<RequestDetail, EngineError> {
        let detail = self
            .ledger
            .request_detail(request_id)
            .await
            .at(stage, request_id)?
            .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
        ensure_open(&detail)?;
        Ok(detail)
    }
}

pub(crate) fn ensure_open(detail: &RequestDetail) -> Result<(), RequestError> {
    if detail.closed {
        return Err(RequestError::RequestClosed(detail.request_id.clone()));
    }
    if detail.timed_out {
        return Err(RequestError::RequestTimedOut(detail.request_id.clone()));
    }
    Ok(())
}

/// The error attached to a failed `*_result` callback.
pub(crate) fn callback_error(error: &EngineError) -> CallbackError {
    CallbackError {
        code: error.code().to_string(),
        message: error.to_string(),
    }
}

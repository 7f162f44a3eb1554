// Path: crates/types/src/app/callback.rs

use super::{LedgerServiceRequest, Mode, NodeId, RequestId, RequestStatus, ResponseValidity};
use serde::{Deserialize, Serialize};

/// The structured error attached to a failed `*_result` callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackError {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Per-service progress reported in `request_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// The service.
    pub service_id: String,
    /// Required number of AS deliveries.
    pub min_as: u32,
    /// AS nodes that signed data.
    pub signed_data_count: u32,
    /// AS deliveries the RP acknowledged.
    pub received_data_count: u32,
}

/// Every JSON body posted to a client application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackBody {
    /// RP: outcome of `create_request`.
    CreateRequestResult {
        /// The client's idempotency key.
        reference_id: String,
        /// The request identifier.
        request_id: RequestId,
        /// Whether the request made it onto the ledger.
        success: bool,
        /// Height of the including block.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creation_block_height: Option<u64>,
        /// Failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CallbackError>,
    },
    /// RP: the request's status changed.
    #[serde(rename = "request_status")]
    RequestStatusUpdate {
        /// The request identifier.
        request_id: RequestId,
        /// Derived status.
        status: RequestStatus,
        /// Protocol mode.
        mode: Mode,
        /// Required number of IdP responses.
        min_idp: u32,
        /// Responses recorded so far.
        answered_idp_count: u32,
        /// Ledger close flag.
        closed: bool,
        /// Ledger timeout flag.
        timed_out: bool,
        /// Per-service progress.
        service_list: Vec<ServiceStatus>,
        /// Per-IdP validity as judged by this RP.
        response_valid_list: Vec<ResponseValidity>,
        /// Height the status was derived at.
        block_height: u64,
    },
    /// RP: outcome of `close_request`.
    CloseRequestResult {
        /// The client's idempotency key.
        reference_id: String,
        /// The request identifier.
        request_id: RequestId,
        /// Whether the close committed.
        success: bool,
        /// Failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CallbackError>,
    },
    /// IdP: a validated consent request awaits the subject's answer.
    IncomingRequest {
        /// The request identifier.
        request_id: RequestId,
        /// Protocol mode.
        mode: Mode,
        /// Subject namespace.
        namespace: String,
        /// Subject identifier.
        identifier: String,
        /// Plaintext consent message.
        request_message: String,
        /// Hex hash of message and salt.
        request_message_hash: String,
        /// Salt hashed together with the message.
        request_message_salt: String,
        /// The requesting RP.
        requester_node_id: NodeId,
        /// Minimum identity assurance level.
        min_ial: f64,
        /// Minimum authentication assurance level.
        min_aal: f64,
        /// Requested services.
        data_request_list: Vec<LedgerServiceRequest>,
        /// Timeout in seconds.
        request_timeout: u64,
        /// Unix milliseconds at creation.
        creation_time: u64,
    },
    /// IdP: outcome of `create_response`.
    CreateResponseResult {
        /// The client's idempotency key.
        reference_id: String,
        /// The request answered.
        request_id: RequestId,
        /// Whether the response committed and was relayed.
        success: bool,
        /// Failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CallbackError>,
    },
    /// AS: a validated data request awaits the AS client's data.
    DataRequest {
        /// The request being served.
        request_id: RequestId,
        /// Protocol mode.
        mode: Mode,
        /// Subject namespace.
        namespace: String,
        /// Subject identifier.
        identifier: String,
        /// The requested service.
        service_id: String,
        /// Plaintext parameters.
        request_params: String,
        /// The requesting RP.
        requester_node_id: NodeId,
        /// IdPs whose accepting responses were verified.
        response_idp_id_list: Vec<NodeId>,
    },
    /// AS: outcome of sending data.
    SendDataResult {
        /// The client's idempotency key.
        reference_id: String,
        /// The request served.
        request_id: RequestId,
        /// The service answered.
        service_id: String,
        /// Whether the data was signed and relayed.
        success: bool,
        /// Failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CallbackError>,
    },
}

impl CallbackBody {
    /// The request the callback refers to.
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::CreateRequestResult { request_id, .. }
            | Self::RequestStatusUpdate { request_id, .. }
            | Self::CloseRequestResult { request_id, .. }
            | Self::IncomingRequest { request_id, .. }
            | Self::CreateResponseResult { request_id, .. }
            | Self::DataRequest { request_id, .. }
            | Self::SendDataResult { request_id, .. } => request_id,
        }
    }

    /// The `type` tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRequestResult { .. } => "create_request_result",
            Self::RequestStatusUpdate { .. } => "request_status",
            Self::CloseRequestResult { .. } => "close_request_result",
            Self::IncomingRequest { .. } => "incoming_request",
            Self::CreateResponseResult { .. } => "create_response_result",
            Self::DataRequest { .. } => "data_request",
            Self::SendDataResult { .. } => "send_data_result",
        }
    }
}

/// Decides whether a queued callback is still worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "probe", rename_all = "snake_case")]
pub enum RetryProbe {
    /// Keep retrying only while the request is neither closed nor timed out.
    RequestOpen {
        /// The request to check.
        request_id: RequestId,
    },
}

/// Consumes the body of a successful callback response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum ResponseHandler {
    /// The AS client may answer a `data_request` with the data inline.
    AsServiceData {
        /// The request being served.
        request_id: RequestId,
        /// The service answered.
        service_id: String,
    },
}

/// A persisted outbound callback awaiting successful delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEntry {
    /// Unique id, stable across retries.
    pub callback_id: String,
    /// Destination URL.
    pub url: String,
    /// JSON body.
    pub body: CallbackBody,
    /// Optional stop condition.
    #[serde(default)]
    pub retry_probe: Option<RetryProbe>,
    /// Optional consumer of the response body.
    #[serde(default)]
    pub response_handler: Option<ResponseHandler>,
    /// Unix milliseconds when queued.
    pub created_at_ms: u64,
    /// Unix milliseconds after which delivery is abandoned.
    pub give_up_at_ms: u64,
    /// Attempts made so far.
    #[serde(default)]
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_callback_omits_absent_error() {
        let body = CallbackBody::CreateRequestResult {
            reference_id: "ref-1".into(),
            request_id: RequestId::from("r1"),
            success: true,
            creation_block_height: Some(10),
            error: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "create_request_result");
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn status_callback_uses_request_status_tag() {
        let body = CallbackBody::RequestStatusUpdate {
            request_id: RequestId::from("r1"),
            status: RequestStatus::Confirmed,
            mode: Mode::One,
            min_idp: 1,
            answered_idp_count: 1,
            closed: false,
            timed_out: false,
            service_list: vec![],
            response_valid_list: vec![],
            block_height: 3,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "request_status");
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["mode"], 1);
        assert_eq!(body.kind(), "request_status");
    }
}

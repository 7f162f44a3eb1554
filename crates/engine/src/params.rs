// Path: crates/engine/src/params.rs
//! Arguments of the client-facing engine operations.

use ndid_types::app::{Mode, NodeId, ResponseStatus};
use serde::{Deserialize, Serialize};

/// One requested service as the RP client submits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequestParams {
    pub service_id: String,
    /// Empty means every AS offering the service at the requested levels.
    #[serde(default)]
    pub as_id_list: Vec<NodeId>,
    pub min_as: u32,
    #[serde(default)]
    pub request_params: String,
}

/// `create_request` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequestParams {
    /// Client idempotency key. Reusing it returns the first request id.
    pub reference_id: String,
    /// Where every callback about this request is posted.
    pub callback_url: String,
    pub mode: Mode,
    pub namespace: String,
    pub identifier: String,
    /// Required in mode 1. Empty means every eligible IdP otherwise.
    #[serde(default)]
    pub idp_id_list: Vec<NodeId>,
    #[serde(default)]
    pub data_request_list: Vec<ServiceRequestParams>,
    pub request_message: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub min_idp: u32,
    /// Seconds. Falls back to the node default.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

/// `create_response` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResponseParams {
    pub reference_id: String,
    /// Where `create_response_result` is posted.
    pub callback_url: String,
    pub request_id: ndid_types::app::RequestId,
    pub status: ResponseStatus,
    pub ial: f64,
    pub aal: f64,
    /// Modes 2 and 3.
    #[serde(default)]
    pub accessor_id: Option<String>,
    /// Base64 accessor signature over the request message (modes 2 and 3).
    #[serde(default)]
    pub signature: Option<String>,
    /// Base64 accessor signature over `namespace:identifier` (mode 3).
    #[serde(default)]
    pub secret: Option<String>,
}

/// `process_data_request` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDataParams {
    pub reference_id: String,
    /// Where `send_data_result` is posted.
    pub callback_url: String,
    pub request_id: ndid_types::app::RequestId,
    pub service_id: String,
    pub data: String,
}

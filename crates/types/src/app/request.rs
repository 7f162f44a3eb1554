// Path: crates/types/src/app/request.rs

use super::{Identity, Mode, NodeId, RequestId, ResponseStatus};
use serde::{Deserialize, Serialize};

/// One requested service, as the RP keeps it off-chain.
///
/// `request_params` never reaches the ledger; only
/// `sha256(request_params || request_params_salt)` does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// The service being requested (e.g. `bank_statement`).
    pub service_id: String,
    /// Explicit AS nodes to ask. Empty means every AS offering the service.
    #[serde(default)]
    pub as_id_list: Vec<NodeId>,
    /// How many AS nodes must deliver data for the service to complete.
    pub min_as: u32,
    /// Free-form parameters forwarded to the AS client.
    #[serde(default)]
    pub request_params: String,
    /// Per-service salt mixed into the parameter hash.
    #[serde(default)]
    pub request_params_salt: String,
}

/// The ledger's view of one requested service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDetail {
    /// The service being requested.
    pub service_id: String,
    /// The AS nodes the RP addressed.
    pub as_id_list: Vec<NodeId>,
    /// Required number of AS deliveries.
    pub min_as: u32,
    /// Hash of the request parameters and their salt.
    pub request_params_hash: String,
    /// AS nodes that have recorded a data signature (`SignData`).
    #[serde(default)]
    pub answered_as_id_list: Vec<NodeId>,
    /// AS nodes whose data the RP has acknowledged (`SetDataReceived`).
    #[serde(default)]
    pub received_data_from_list: Vec<NodeId>,
}

impl ServiceDetail {
    /// Number of AS nodes that signed data for this service.
    pub fn signed_count(&self) -> u32 {
        u32::try_from(self.answered_as_id_list.len()).unwrap_or(u32::MAX)
    }

    /// Number of AS deliveries the RP has recorded for this service.
    pub fn received_count(&self) -> u32 {
        u32::try_from(self.received_data_from_list.len()).unwrap_or(u32::MAX)
    }
}

/// An IdP response as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpResponse {
    /// The responding IdP.
    pub idp_id: NodeId,
    /// Accept or reject.
    pub status: ResponseStatus,
    /// Identity assurance level the IdP vouches for.
    pub ial: f64,
    /// Authentication assurance level the IdP vouches for.
    pub aal: f64,
    /// Base64 consent signature (node key in mode 1, accessor key otherwise).
    pub signature: String,
    /// Accessor whose key produced `signature` (modes 2 and 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<String>,
    /// The public commitments declared before responding (mode 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_proof: Option<Vec<String>>,
    /// Hex SHA-256 of the private proof pair (mode 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_proof_hash: Option<String>,
}

/// The full request record as returned by `GetRequestDetail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDetail {
    /// The request identifier.
    pub request_id: RequestId,
    /// The RP that created the request.
    pub requester_node_id: NodeId,
    /// Protocol mode.
    pub mode: Mode,
    /// Required number of IdP responses.
    pub min_idp: u32,
    /// Minimum identity assurance level.
    pub min_ial: f64,
    /// Minimum authentication assurance level.
    pub min_aal: f64,
    /// Timeout in seconds, measured from creation.
    pub request_timeout: u64,
    /// IdPs the RP addressed explicitly. Empty means any eligible IdP.
    #[serde(default)]
    pub idp_id_list: Vec<NodeId>,
    /// Hex SHA-256 of `request_message || request_message_salt`.
    pub request_message_hash: String,
    /// Requested services.
    #[serde(default)]
    pub data_request_list: Vec<ServiceDetail>,
    /// Append-only IdP responses.
    #[serde(default)]
    pub responses: Vec<IdpResponse>,
    /// Set once by `CloseRequest`.
    #[serde(default)]
    pub closed: bool,
    /// Set once by `TimeOutRequest`.
    #[serde(default)]
    pub timed_out: bool,
    /// Height of the block that included `CreateRequest`.
    #[serde(default)]
    pub creation_block_height: u64,
}

impl RequestDetail {
    /// Whether the request has reached a terminal ledger state.
    pub fn is_finished(&self) -> bool {
        self.closed || self.timed_out
    }

    /// Looks up a recorded response by IdP.
    pub fn response_of(&self, idp_id: &NodeId) -> Option<&IdpResponse> {
        self.responses.iter().find(|r| &r.idp_id == idp_id)
    }

    /// Looks up a requested service.
    pub fn service(&self, service_id: &str) -> Option<&ServiceDetail> {
        self.data_request_list
            .iter()
            .find(|s| s.service_id == service_id)
    }
}

/// The RP's judgement of one IdP response, recorded at close time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseValidity {
    /// The IdP whose response was judged.
    pub idp_id: NodeId,
    /// Whether the consent signature verified. `None` if not checked.
    pub valid_signature: Option<bool>,
    /// Whether the zero-knowledge proof verified. `None` outside mode 3.
    pub valid_proof: Option<bool>,
    /// Whether the asserted IAL met the request minimum.
    pub valid_ial: Option<bool>,
}

impl ResponseValidity {
    /// A response is valid when no evaluated check failed.
    pub fn is_valid(&self) -> bool {
        self.valid_signature != Some(false)
            && self.valid_proof != Some(false)
            && self.valid_ial != Some(false)
    }
}

/// The RP's off-chain record of a request it created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// The request identifier.
    pub request_id: RequestId,
    /// The client's idempotency key.
    pub reference_id: String,
    /// Where results for this request are posted.
    pub callback_url: String,
    /// Protocol mode.
    pub mode: Mode,
    /// The subject being identified.
    pub identity: Identity,
    /// Plaintext consent message shown to the subject.
    pub request_message: String,
    /// Salt hashed together with the message.
    pub request_message_salt: String,
    /// IdPs addressed.
    pub idp_id_list: Vec<NodeId>,
    /// Required number of IdP responses.
    pub min_idp: u32,
    /// Minimum identity assurance level.
    pub min_ial: f64,
    /// Minimum authentication assurance level.
    pub min_aal: f64,
    /// Timeout in seconds.
    pub request_timeout: u64,
    /// Requested services with their plaintext parameters.
    pub data_request_list: Vec<DataRequest>,
    /// Wall-clock creation time in unix milliseconds.
    pub created_at_ms: u64,
    /// Set once the data requests were forwarded to the AS nodes.
    #[serde(default)]
    pub data_request_forwarded: bool,
    /// Per-IdP validity judged so far.
    #[serde(default)]
    pub response_validity: Vec<ResponseValidity>,
}

impl RequestRecord {
    /// Inserts or replaces the validity entry of one IdP.
    pub fn record_validity(&mut self, validity: ResponseValidity) {
        match self
            .response_validity
            .iter_mut()
            .find(|v| v.idp_id == validity.idp_id)
        {
            Some(existing) => *existing = validity,
            None => self.response_validity.push(validity),
        }
    }

    /// The validity entry of one IdP, if judged.
    pub fn validity_of(&self, idp_id: &NodeId) -> Option<&ResponseValidity> {
        self.response_validity.iter().find(|v| &v.idp_id == idp_id)
    }
}

/// Data an AS delivered to the RP for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsDataRecord {
    /// The request the data belongs to.
    pub request_id: RequestId,
    /// The service the data answers.
    pub service_id: String,
    /// The AS that produced it.
    pub as_id: NodeId,
    /// The data itself.
    pub data: String,
    /// Salt signed together with the data.
    pub data_salt: String,
    /// Base64 AS node signature over `data || data_salt`.
    pub signature: String,
}

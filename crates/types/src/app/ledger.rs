// Path: crates/types/src/app/ledger.rs

use super::{ContinuationEnvelope, Mode, NodeId, RequestId, ResponseStatus, ResponseValidity, Role, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State-changing ledger functions submitted as transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerFunction {
    /// RP registers a new request.
    CreateRequest,
    /// IdP declares its public ZK commitments.
    DeclareIdentityProof,
    /// IdP records its response.
    CreateIdpResponse,
    /// AS records its signature over the delivered data.
    SignData,
    /// RP acknowledges receipt of AS data.
    SetDataReceived,
    /// RP closes the request.
    CloseRequest,
    /// RP marks the request as timed out.
    TimeOutRequest,
}

impl LedgerFunction {
    /// The function name used in transaction payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRequest => "CreateRequest",
            Self::DeclareIdentityProof => "DeclareIdentityProof",
            Self::CreateIdpResponse => "CreateIdpResponse",
            Self::SignData => "SignData",
            Self::SetDataReceived => "SetDataReceived",
            Self::CloseRequest => "CloseRequest",
            Self::TimeOutRequest => "TimeOutRequest",
        }
    }
}

impl fmt::Display for LedgerFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerQuery {
    /// Full request record.
    GetRequestDetail,
    /// Registry entry of one node.
    GetNodeInfo,
    /// IdPs eligible for the given assurance levels.
    GetIdpNodes,
    /// AS nodes offering a service.
    GetAsNodesByServiceId,
    /// Accessor public key and status.
    GetAccessor,
    /// Commitments an IdP declared for a request.
    GetIdentityProof,
    /// Signature an AS recorded for a service.
    GetDataSignature,
}

impl LedgerQuery {
    /// The query name sent to the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetRequestDetail => "GetRequestDetail",
            Self::GetNodeInfo => "GetNodeInfo",
            Self::GetIdpNodes => "GetIdpNodes",
            Self::GetAsNodesByServiceId => "GetAsNodesByServiceId",
            Self::GetAccessor => "GetAccessor",
            Self::GetIdentityProof => "GetIdentityProof",
            Self::GetDataSignature => "GetDataSignature",
        }
    }
}

impl fmt::Display for LedgerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested service as written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerServiceRequest {
    /// The service being requested.
    pub service_id: String,
    /// AS nodes addressed.
    pub as_id_list: Vec<NodeId>,
    /// Required number of AS deliveries.
    pub min_as: u32,
    /// Hex SHA-256 of `request_params || request_params_salt`.
    pub request_params_hash: String,
}

/// Arguments of `CreateRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequestArgs {
    /// The new request identifier.
    pub request_id: RequestId,
    /// Protocol mode.
    pub mode: Mode,
    /// Required number of IdP responses.
    pub min_idp: u32,
    /// Minimum identity assurance level.
    pub min_ial: f64,
    /// Minimum authentication assurance level.
    pub min_aal: f64,
    /// Timeout in seconds.
    pub request_timeout: u64,
    /// IdPs addressed.
    pub idp_id_list: Vec<NodeId>,
    /// Hashed service requests.
    pub data_request_list: Vec<LedgerServiceRequest>,
    /// Hex SHA-256 of `request_message || request_message_salt`.
    pub request_message_hash: String,
}

/// Arguments of `DeclareIdentityProof`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclareIdentityProofArgs {
    /// The request being answered.
    pub request_id: RequestId,
    /// Base64 public commitments `k_i^e mod n`, one per round.
    pub identity_proof: Vec<String>,
}

/// Arguments of `CreateIdpResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIdpResponseArgs {
    /// The request being answered.
    pub request_id: RequestId,
    /// Accept or reject.
    pub status: ResponseStatus,
    /// Asserted identity assurance level.
    pub ial: f64,
    /// Asserted authentication assurance level.
    pub aal: f64,
    /// Base64 consent signature.
    pub signature: String,
    /// Accessor used in modes 2 and 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<String>,
    /// The commitments declared earlier (mode 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_proof: Option<Vec<String>>,
    /// Hex SHA-256 of the private proof pair (mode 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_proof_hash: Option<String>,
}

/// Arguments of `SignData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignDataArgs {
    /// The request being served.
    pub request_id: RequestId,
    /// The service being answered.
    pub service_id: String,
    /// Base64 AS signature over `data || data_salt`.
    pub signature: String,
}

/// Arguments of `SetDataReceived`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDataReceivedArgs {
    /// The request being served.
    pub request_id: RequestId,
    /// The service answered.
    pub service_id: String,
    /// The AS whose data arrived.
    pub as_id: NodeId,
}

/// Arguments of `CloseRequest` and `TimeOutRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishRequestArgs {
    /// The request being finished.
    pub request_id: RequestId,
    /// The RP's final judgement of every response.
    pub response_valid_list: Vec<ResponseValidity>,
}

/// Query argument naming only a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdArgs {
    /// The request to look up.
    pub request_id: RequestId,
}

/// Query argument naming only a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdArgs {
    /// The node to look up.
    pub node_id: NodeId,
}

/// Arguments of `GetIdpNodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetIdpNodesArgs {
    /// Minimum identity assurance level the IdP must support.
    pub min_ial: f64,
    /// Minimum authentication assurance level the IdP must support.
    pub min_aal: f64,
    /// Restrict the result to these nodes. Empty means no restriction.
    #[serde(default)]
    pub node_id_list: Vec<NodeId>,
}

/// Arguments of `GetAsNodesByServiceId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdArgs {
    /// The service to look up.
    pub service_id: String,
}

/// Arguments of `GetAccessor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorArgs {
    /// The accessor to look up.
    pub accessor_id: String,
}

/// Arguments of `GetIdentityProof`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProofArgs {
    /// The request answered.
    pub request_id: RequestId,
    /// The IdP that declared the proof.
    pub idp_id: NodeId,
}

/// Arguments of `GetDataSignature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSignatureArgs {
    /// The request served.
    pub request_id: RequestId,
    /// The service answered.
    pub service_id: String,
    /// The AS that signed.
    pub node_id: NodeId,
}

/// A node registry entry returned by `GetNodeInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node identifier.
    pub node_id: NodeId,
    /// The node's role.
    pub role: Role,
    /// PEM-encoded node signing key.
    pub public_key: String,
    /// Message queue host, if the node receives peer messages.
    #[serde(default)]
    pub ip: Option<String>,
    /// Message queue port, if the node receives peer messages.
    #[serde(default)]
    pub port: Option<u16>,
    /// Highest IAL an IdP can assert.
    #[serde(default)]
    pub max_ial: f64,
    /// Highest AAL an IdP can assert.
    #[serde(default)]
    pub max_aal: f64,
    /// Whether the node is enabled.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// An IdP entry returned by `GetIdpNodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpNode {
    /// The IdP identifier.
    pub node_id: NodeId,
    /// Highest IAL the IdP can assert.
    pub max_ial: f64,
    /// Highest AAL the IdP can assert.
    pub max_aal: f64,
}

/// An AS entry returned by `GetAsNodesByServiceId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsNode {
    /// The AS identifier.
    pub node_id: NodeId,
    /// Lowest IAL the AS accepts.
    pub min_ial: f64,
    /// Lowest AAL the AS accepts.
    pub min_aal: f64,
}

/// An accessor entry returned by `GetAccessor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorInfo {
    /// The accessor identifier.
    pub accessor_id: String,
    /// PEM-encoded accessor public key.
    pub accessor_public_key: String,
    /// Whether the accessor may still be used.
    pub active: bool,
}

/// Result of `GetIdentityProof`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProofRecord {
    /// Base64 public commitments, one per round.
    pub identity_proof: Vec<String>,
}

/// Result of `GetDataSignature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSignatureRecord {
    /// Base64 AS signature over `data || data_salt`.
    pub signature: String,
}

/// Receipt of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Hash of the submitted payload.
    pub tx_hash: TxHash,
    /// Inclusion height when the backend already knows it.
    pub height: Option<u64>,
}

/// The outcome of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// Height of the including block.
    pub height: u64,
    /// Whether the ledger applied the transaction.
    pub success: bool,
    /// Ledger-side rejection reason.
    #[serde(default)]
    pub error: Option<String>,
}

/// Events delivered by the ledger subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A new block was committed.
    NewBlock {
        /// The committed height.
        height: u64,
        /// Blocks skipped since the previous event.
        missing_block_count: u64,
    },
    /// A transaction was committed.
    TxCommitted {
        /// The committed transaction.
        tx_hash: TxHash,
        /// Its outcome.
        result: TxResult,
    },
}

/// A transaction this node submitted and is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedTx {
    /// Hash of the submitted payload.
    pub tx_hash: TxHash,
    /// The function submitted.
    pub function: LedgerFunction,
    /// Whether a caller is blocked on the commit.
    pub wait_for_commit: bool,
    /// Step resumed on commit.
    pub continuation: Option<ContinuationEnvelope>,
    /// Unix milliseconds at submission.
    pub submitted_at_ms: u64,
}

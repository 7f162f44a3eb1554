// Path: crates/types/src/app/messages.rs

use super::{LedgerServiceRequest, Mode, NodeId, RequestId};
use serde::{Deserialize, Serialize};

/// A consent request sent by the RP to every addressed IdP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRequestMessage {
    /// The request identifier.
    pub request_id: RequestId,
    /// Protocol mode.
    pub mode: Mode,
    /// Subject namespace.
    pub namespace: String,
    /// Subject identifier.
    pub identifier: String,
    /// Plaintext consent message.
    pub request_message: String,
    /// Salt hashed together with the message.
    pub request_message_salt: String,
    /// Required number of IdP responses.
    pub min_idp: u32,
    /// Minimum identity assurance level.
    pub min_ial: f64,
    /// Minimum authentication assurance level.
    pub min_aal: f64,
    /// Timeout in seconds.
    pub request_timeout: u64,
    /// Hashed service requests, for display to the subject.
    pub data_request_list: Vec<LedgerServiceRequest>,
    /// The originating RP.
    pub rp_id: NodeId,
    /// Unix milliseconds at creation.
    pub creation_time: u64,
    /// Height at which `CreateRequest` was committed.
    pub height: u64,
}

/// Sent by an IdP to the RP once its commitments are on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRequestMessage {
    /// The request identifier.
    pub request_id: RequestId,
    /// The IdP asking for a challenge.
    pub idp_id: NodeId,
    /// The declared public commitments.
    pub public_proof: Vec<String>,
    /// Height at which `DeclareIdentityProof` was committed.
    pub height: u64,
}

/// The RP's challenge pair for one IdP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponseMessage {
    /// The request identifier.
    pub request_id: RequestId,
    /// The RP issuing the challenge.
    pub rp_id: NodeId,
    /// Base64 challenges, one per round.
    pub challenge: Vec<String>,
    /// Height at which the commitments were observed.
    pub height: u64,
}

/// Sent by an IdP to the RP once its response is on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpResponseMessage {
    /// The request identifier.
    pub request_id: RequestId,
    /// The responding IdP.
    pub idp_id: NodeId,
    /// Base64 private proofs, one per round (mode 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_proof: Option<Vec<String>>,
    /// Base64 PKCS#1 v1.5 padding that prefixes the hashed subject (mode 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
    /// Height at which `CreateIdpResponse` was committed.
    pub height: u64,
}

/// Plaintext parameters for one service, forwarded to an AS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDataRequest {
    /// The requested service.
    pub service_id: String,
    /// Plaintext parameters.
    pub request_params: String,
    /// Salt whose hash with the parameters is on chain.
    pub request_params_salt: String,
}

/// Off-chain proof material of one IdP response, relayed to the AS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpProofBundle {
    /// The responding IdP.
    pub idp_id: NodeId,
    /// Challenges the RP issued to this IdP.
    pub challenge: Vec<String>,
    /// Base64 private proofs, one per round.
    pub private_proof: Vec<String>,
    /// Base64 padding prefix.
    pub padding: String,
}

/// Sent by the RP to an AS once enough IdPs accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequestMessage {
    /// The request identifier.
    pub request_id: RequestId,
    /// Protocol mode.
    pub mode: Mode,
    /// Subject namespace.
    pub namespace: String,
    /// Subject identifier.
    pub identifier: String,
    /// Plaintext consent message.
    pub request_message: String,
    /// Salt hashed together with the message.
    pub request_message_salt: String,
    /// Services this AS is asked to answer.
    pub service_data_request_list: Vec<ServiceDataRequest>,
    /// Proof material of the accepting IdPs (mode 3).
    #[serde(default)]
    pub idp_proofs: Vec<IdpProofBundle>,
    /// The requesting RP.
    pub rp_id: NodeId,
    /// Unix milliseconds at request creation.
    pub creation_time: u64,
    /// Height of the last response counted toward the quorum.
    pub height: u64,
}

/// Data an AS returns to the RP for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsDataResponseMessage {
    /// The request identifier.
    pub request_id: RequestId,
    /// The service answered.
    pub service_id: String,
    /// The answering AS.
    pub as_id: NodeId,
    /// The data.
    pub data: String,
    /// Salt signed together with the data.
    pub data_salt: String,
    /// Base64 AS node signature over `data || data_salt`.
    pub signature: String,
    /// Height at which `SignData` was committed.
    pub height: u64,
}

/// Every message exchanged between nodes over the peer transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// RP → IdP.
    ConsentRequest(ConsentRequestMessage),
    /// IdP → RP.
    ChallengeRequest(ChallengeRequestMessage),
    /// RP → IdP.
    ChallengeResponse(ChallengeResponseMessage),
    /// IdP → RP.
    IdpResponse(IdpResponseMessage),
    /// RP → AS.
    DataRequest(DataRequestMessage),
    /// AS → RP.
    AsDataResponse(AsDataResponseMessage),
}

impl PeerMessage {
    /// The request the message refers to.
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::ConsentRequest(m) => &m.request_id,
            Self::ChallengeRequest(m) => &m.request_id,
            Self::ChallengeResponse(m) => &m.request_id,
            Self::IdpResponse(m) => &m.request_id,
            Self::DataRequest(m) => &m.request_id,
            Self::AsDataResponse(m) => &m.request_id,
        }
    }

    /// The ledger height the sender observed when sending.
    pub fn height(&self) -> u64 {
        match self {
            Self::ConsentRequest(m) => m.height,
            Self::ChallengeRequest(m) => m.height,
            Self::ChallengeResponse(m) => m.height,
            Self::IdpResponse(m) => m.height,
            Self::DataRequest(m) => m.height,
            Self::AsDataResponse(m) => m.height,
        }
    }

    /// The node that sent the message.
    pub fn sender(&self) -> &NodeId {
        match self {
            Self::ConsentRequest(m) => &m.rp_id,
            Self::ChallengeRequest(m) => &m.idp_id,
            Self::ChallengeResponse(m) => &m.rp_id,
            Self::IdpResponse(m) => &m.idp_id,
            Self::DataRequest(m) => &m.rp_id,
            Self::AsDataResponse(m) => &m.as_id,
        }
    }

    /// Short message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConsentRequest(_) => "consent_request",
            Self::ChallengeRequest(_) => "challenge_request",
            Self::ChallengeResponse(_) => "challenge_response",
            Self::IdpResponse(_) => "idp_response",
            Self::DataRequest(_) => "data_request",
            Self::AsDataResponse(_) => "as_data_response",
        }
    }
}

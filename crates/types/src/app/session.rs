// Path: crates/types/src/app/session.rs

use super::{ConsentRequestMessage, DataRequestMessage, NodeId, RequestId, ResponseStatus};
use serde::{Deserialize, Serialize};

/// The IdP's zero-knowledge state for one request.
///
/// Created when the commitments are drawn, completed once the RP's challenge
/// arrives, and purged when the request ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkSession {
    /// PEM accessor public key the proof is computed against.
    pub accessor_public_key: String,
    /// Base64 accessor signature over the hashed subject.
    pub secret: String,
    /// Base64 padding prefix extracted from the secret.
    pub padding: String,
    /// Base64 blinding values, one per round.
    pub blinding: Vec<String>,
    /// Base64 commitments declared on chain.
    pub public_proof: Vec<String>,
    /// Challenges received from the RP.
    #[serde(default)]
    pub challenge: Option<Vec<String>>,
    /// Private proofs computed from the challenge.
    #[serde(default)]
    pub private_proof: Option<Vec<String>>,
}

/// An IdP response in flight between `create_response` and relay to the RP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpResponseDraft {
    /// The request being answered.
    pub request_id: RequestId,
    /// The RP to relay to.
    pub rp_id: NodeId,
    /// The client's idempotency key.
    pub reference_id: String,
    /// Where `create_response_result` is posted.
    pub callback_url: String,
    /// Accept or reject.
    pub status: ResponseStatus,
    /// Asserted identity assurance level.
    pub ial: f64,
    /// Asserted authentication assurance level.
    pub aal: f64,
    /// Base64 consent signature.
    pub signature: String,
    /// Accessor used in modes 2 and 3.
    #[serde(default)]
    pub accessor_id: Option<String>,
    /// Proof state in mode 3.
    #[serde(default)]
    pub zk: Option<ZkSession>,
    /// Set once `CreateIdpResponse` was submitted.
    #[serde(default)]
    pub submitted: bool,
}

/// A consent request an IdP accepted for processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRequestRecord {
    /// The message as received.
    pub message: ConsentRequestMessage,
    /// Unix milliseconds when it passed validation.
    pub received_at_ms: u64,
}

/// Progress of one service on the AS side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsServiceState {
    /// The service.
    pub service_id: String,
    /// Plaintext parameters from the RP.
    pub request_params: String,
    /// Set once the `data_request` callback was queued.
    #[serde(default)]
    pub callback_queued: bool,
    /// Data signed and submitted, awaiting commit.
    #[serde(default)]
    pub signed: Option<SignedData>,
    /// Set once the data was relayed to the RP.
    #[serde(default)]
    pub data_sent: bool,
}

/// Data an AS signed for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedData {
    /// The data.
    pub data: String,
    /// Salt signed with the data.
    pub data_salt: String,
    /// Base64 signature over `data || data_salt`.
    pub signature: String,
    /// The client's idempotency key for `send_data_result`.
    pub reference_id: String,
    /// Where `send_data_result` is posted.
    pub callback_url: String,
}

/// A data request an AS validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsRequestRecord {
    /// The message as received.
    pub message: DataRequestMessage,
    /// IdPs whose accepting responses were verified.
    pub verified_idps: Vec<NodeId>,
    /// Per-service progress.
    pub services: Vec<AsServiceState>,
}

impl AsRequestRecord {
    /// Mutable access to one service's state.
    pub fn service_mut(&mut self, service_id: &str) -> Option<&mut AsServiceState> {
        self.services.iter_mut().find(|s| s.service_id == service_id)
    }

    /// Shared access to one service's state.
    pub fn service(&self, service_id: &str) -> Option<&AsServiceState> {
        self.services.iter().find(|s| s.service_id == service_id)
    }
}

/// Node-level callback destinations, changed only through the engine's setters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUrls {
    /// IdP: where `incoming_request` is posted.
    #[serde(default)]
    pub incoming_request_url: Option<String>,
    /// AS: where `data_request` is posted, per service.
    #[serde(default)]
    pub data_request_urls: std::collections::BTreeMap<String, String>,
}

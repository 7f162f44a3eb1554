// Path: crates/networking/src/wire.rs

//! SCALE forms of the messages that use the compact frame.
//!
//! SCALE has no floating point type, so assurance levels travel as their
//! IEEE-754 bit patterns.

use ndid_types::app::{
    AsDataResponseMessage, ConsentRequestMessage, LedgerServiceRequest, Mode, NodeId, RequestId,
};
use parity_scale_codec::{Decode, Encode};

/// A hashed service request inside a consent request.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct WireServiceRequest {
    pub service_id: String,
    pub as_id_list: Vec<NodeId>,
    pub min_as: u32,
    pub request_params_hash: String,
}

/// Compact consent request.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct WireConsentRequest {
    pub request_id: RequestId,
    pub mode: Mode,
    pub namespace: String,
    pub identifier: String,
    pub request_message: String,
    pub request_message_salt: String,
    pub min_idp: u32,
    pub min_ial_bits: u64,
    pub min_aal_bits: u64,
    pub request_timeout: u64,
    pub data_request_list: Vec<WireServiceRequest>,
    pub rp_id: NodeId,
    pub creation_time: u64,
    pub height: u64,
}

/// Compact AS data response. `data` is `None` when it travels in the raw segment.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct WireAsDataResponse {
    pub request_id: RequestId,
    pub service_id: String,
    pub as_id: NodeId,
    pub data: Option<String>,
    pub data_salt: String,
    pub signature: String,
    pub height: u64,
}

/// Body of a compact frame.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum WireMessage {
    ConsentRequest(WireConsentRequest),
    AsDataResponse(WireAsDataResponse),
}

impl From<&LedgerServiceRequest> for WireServiceRequest {
    fn from(s: &LedgerServiceRequest) -> Self {
        Self {
            service_id: s.service_id.clone(),
            as_id_list: s.as_id_list.clone(),
            min_as: s.min_as,
            request_params_hash: s.request_params_hash.clone(),
        }
    }
}

impl From<WireServiceRequest> for LedgerServiceRequest {
    fn from(s: WireServiceRequest) -> Self {
        Self {
            service_id: s.service_id,
            as_id_list: s.as_id_list,
            min_as: s.min_as,
            request_params_hash: s.request_params_hash,
        }
    }
}

impl From<&ConsentRequestMessage> for WireConsentRequest {
    fn from(m: &ConsentRequestMessage) -> Self {
        Self {
            request_id: m.request_id.clone(),
            mode: m.mode,
            namespace: m.namespace.clone(),
            identifier: m.identifier.clone(),
            request_message: m.request_message.clone(),
            request_message_salt: m.request_message_salt.clone(),
            min_idp: m.min_idp,
            min_ial_bits: m.min_ial.to_bits(),
            min_aal_bits: m.min_aal.to_bits(),
            request_timeout: m.request_timeout,
            data_request_list: m.data_request_list.iter().map(Into::into).collect(),
            rp_id: m.rp_id.clone(),
            creation_time: m.creation_time,
            height: m.height,
        }
    }
}

impl From<WireConsentRequest> for ConsentRequestMessage {
    fn from(m: WireConsentRequest) -> Self {
        Self {
            request_id: m.request_id,
            mode: m.mode,
            namespace: m.namespace,
            identifier: m.identifier,
            request_message: m.request_message,
            request_message_salt: m.request_message_salt,
            min_idp: m.min_idp,
            min_ial: f64::from_bits(m.min_ial_bits),
            min_aal: f64::from_bits(m.min_aal_bits),
            request_timeout: m.request_timeout,
            data_request_list: m.data_request_list.into_iter().map(Into::into).collect(),
            rp_id: m.rp_id,
            creation_time: m.creation_time,
            height: m.height,
        }
    }
}

impl WireAsDataResponse {
    /// Converts a message, leaving the data out when `split` is set.
    pub fn from_message(m: &AsDataResponseMessage, split: bool) -> Self {
        Self {
            request_id: m.request_id.clone(),
            service_id: m.service_id.clone(),
            as_id: m.as_id.clone(),
            data: (!split).then(|| m.data.clone()),
            data_salt: m.data_salt.clone(),
            signature: m.signature.clone(),
            height: m.height,
        }
    }

    /// Rebuilds the message with `data` taken from the body or the raw segment.
    pub fn into_message(self, data: String) -> AsDataResponseMessage {
        AsDataResponseMessage {
            request_id: self.request_id,
            service_id: self.service_id,
            as_id: self.as_id,
            data,
            data_salt: self.data_salt,
            signature: self.signature,
            height: self.height,
        }
    }
}

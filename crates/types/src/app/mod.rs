// Path: crates/types/src/app/mod.rs

//! Core identifiers and domain enums shared by every NDID node role.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON bodies posted to client applications and the retry metadata attached to them.
pub mod callback;
/// The closed set of continuations resumed when a submitted transaction commits.
pub mod continuation;
/// Ledger function names, their argument payloads and query results.
pub mod ledger;
/// Messages exchanged between nodes over the peer transport.
pub mod messages;
/// Request data as held off-chain by the RP and as reported by the ledger.
pub mod request;
/// Per-request working state kept by IdP and AS nodes.
pub mod session;

pub use callback::*;
pub use continuation::*;
pub use ledger::*;
pub use messages::*;
pub use request::*;
pub use session::*;

/// The identifier of a node registered on the ledger.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Creates a node id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The opaque, collision-resistant identifier of a request.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Creates a request id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The hex-encoded hash of a transaction submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role a node plays in the identity platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Relying Party: originates requests.
    Rp,
    /// Identity Provider: attests the subject's identity.
    Idp,
    /// Authentication/Attribute Service: supplies data after consent.
    As,
    /// Governance node.
    Ndid,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Rp => "rp",
            Role::Idp => "idp",
            Role::As => "as",
            Role::Ndid => "ndid",
        };
        f.write_str(s)
    }
}

/// The protocol variant of a request.
///
/// Mode 1 carries a plaintext consent signature by the IdP node; modes 2 and 3
/// bind the response to the subject's accessor key, and mode 3 adds the
/// zero-knowledge consent proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mode {
    /// Plaintext consent signature by the IdP node key.
    One,
    /// Accessor-signed consent.
    Two,
    /// Accessor-signed consent with a zero-knowledge identity proof.
    Three,
}

impl Mode {
    /// Whether responses in this mode are bound to an accessor key.
    pub fn uses_accessor(self) -> bool {
        !matches!(self, Mode::One)
    }

    /// Whether responses in this mode must carry a zero-knowledge proof.
    pub fn requires_zk_proof(self) -> bool {
        matches!(self, Mode::Three)
    }

    /// Whether the subject identifier must be hashed before reaching the ledger.
    pub fn hashes_subject(self) -> bool {
        self.uses_accessor()
    }
}

impl TryFrom<u8> for Mode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Mode::One),
            2 => Ok(Mode::Two),
            3 => Ok(Mode::Three),
            other => Err(format!("unsupported mode {other}")),
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::One => 1,
            Mode::Two => 2,
            Mode::Three => 3,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// The subject of a request: an identifier within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Identity {
    /// The identifier namespace (e.g. `citizen_id`).
    pub namespace: String,
    /// The identifier within the namespace.
    pub identifier: String,
}

impl Identity {
    /// Creates a new identity reference.
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }

    /// The canonical `namespace:identifier` form that is hashed for the ledger.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.namespace, self.identifier)
    }
}

/// An IdP's answer to a consent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The subject consented and was authenticated.
    Accept,
    /// The subject declined or could not be authenticated.
    Reject,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Accept => f.write_str("accept"),
            ResponseStatus::Reject => f.write_str("reject"),
        }
    }
}

/// The derived status of a request.
///
/// `closed` and `timed_out` are reported separately as explicit ledger flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// No IdP has responded yet.
    Pending,
    /// At least one accept and no rejects.
    Confirmed,
    /// At least one reject and no accepts.
    Rejected,
    /// Both accepts and rejects were received.
    Complicated,
    /// Every required response and data delivery has happened.
    Completed,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Confirmed => "confirmed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Complicated => "complicated",
            RequestStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A transport destination resolved from the ledger's node registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// The node this address belongs to.
    pub node_id: NodeId,
    /// Host or IP address of the node's message queue endpoint.
    pub ip: String,
    /// Port of the node's message queue endpoint.
    pub port: u16,
    /// PEM-encoded public key used by the transport to encrypt for the node.
    pub public_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_serializes_as_number() {
        let json = serde_json::to_string(&Mode::Three).unwrap();
        assert_eq!(json, "3");
        let mode: Mode = serde_json::from_str("1").unwrap();
        assert_eq!(mode, Mode::One);
        assert!(serde_json::from_str::<Mode>("4").is_err());
    }

    #[test]
    fn mode_capabilities() {
        assert!(!Mode::One.uses_accessor());
        assert!(Mode::Two.uses_accessor());
        assert!(!Mode::Two.requires_zk_proof());
        assert!(Mode::Three.requires_zk_proof());
    }

    #[test]
    fn identity_canonical_form() {
        let id = Identity::new("citizen_id", "1234567890123");
        assert_eq!(id.canonical(), "citizen_id:1234567890123");
    }
}

// Path: crates/types/src/app/continuation.rs

use super::{NodeId, RequestId};
use serde::{Deserialize, Serialize};

/// Current layout version of [`ContinuationEnvelope`].
pub const CONTINUATION_VERSION: u16 = 1;

/// What to do once a submitted transaction commits.
///
/// Stored inside the expected-transaction record so the step survives a
/// restart between broadcast and commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Continuation {
    /// RP: send consent requests and report the creation result.
    RequestCreated {
        /// The created request.
        request_id: RequestId,
    },
    /// IdP: ask the RP for a challenge.
    IdentityProofDeclared {
        /// The request being answered.
        request_id: RequestId,
        /// The RP to contact.
        rp_id: NodeId,
    },
    /// IdP: relay proof material and report the response result.
    IdpResponseCreated {
        /// The request answered.
        request_id: RequestId,
        /// The RP to contact.
        rp_id: NodeId,
    },
    /// AS: relay the signed data to the RP.
    DataSigned {
        /// The request served.
        request_id: RequestId,
        /// The service answered.
        service_id: String,
        /// The RP to contact.
        rp_id: NodeId,
    },
    /// RP: re-evaluate status after acknowledging AS data.
    DataReceivedRecorded {
        /// The request served.
        request_id: RequestId,
        /// The service answered.
        service_id: String,
        /// The AS whose data arrived.
        as_id: NodeId,
    },
    /// RP: disarm the timeout, purge sessions and report.
    RequestClosed {
        /// The closed request.
        request_id: RequestId,
    },
    /// RP: purge sessions and report.
    RequestTimedOut {
        /// The timed-out request.
        request_id: RequestId,
    },
}

impl Continuation {
    /// The request the continuation belongs to.
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::RequestCreated { request_id }
            | Self::IdentityProofDeclared { request_id, .. }
            | Self::IdpResponseCreated { request_id, .. }
            | Self::DataSigned { request_id, .. }
            | Self::DataReceivedRecorded { request_id, .. }
            | Self::RequestClosed { request_id }
            | Self::RequestTimedOut { request_id } => request_id,
        }
    }

    /// Wraps the continuation at the current layout version.
    pub fn envelope(self) -> ContinuationEnvelope {
        ContinuationEnvelope {
            version: CONTINUATION_VERSION,
            continuation: self,
        }
    }
}

/// A versioned, serialisable continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationEnvelope {
    /// Layout version the record was written with.
    pub version: u16,
    /// The step to resume.
    #[serde(flatten)]
    pub continuation: Continuation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_kind_next_to_version() {
        let env = Continuation::DataSigned {
            request_id: RequestId::from("r1"),
            service_id: "bank_statement".into(),
            rp_id: NodeId::from("rp1"),
        }
        .envelope();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["kind"], "data_signed");
        assert_eq!(json["service_id"], "bank_statement");

        let back: ContinuationEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.continuation.request_id().as_str(), "r1");
    }
}

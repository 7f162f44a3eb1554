// Path: crates/types/src/error/mod.rs
//! Core error types for NDID nodes.

use crate::app::{Mode, NodeId, RequestId};
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// How the engine reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad input or a policy violation. Never retried.
    Client,
    /// A hash, signature or proof did not check out. Treated as a reject.
    ProtocolIntegrity,
    /// Ledger, transport or callback failure. Retried with backoff.
    TransientInfrastructure,
    /// The local durable store failed. Propagates.
    FatalLocal,
}

impl ErrorClass {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::ProtocolIntegrity => "protocol_integrity",
            Self::TransientInfrastructure => "transient_infrastructure",
            Self::FatalLocal => "fatal_local",
        }
    }
}

/// Client-facing validation and policy errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// A malformed argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// `min_idp` must be at least one.
    #[error("min_idp must be at least 1")]
    MinIdpTooLow,
    /// Mode 1 needs explicit IdPs.
    #[error("Mode 1 requires an explicit idp_id_list")]
    IdpListRequired,
    /// Fewer IdPs than required.
    #[error("Not enough IdPs: required {required}, available {available}")]
    InsufficientIdp {
        /// `min_idp`.
        required: u32,
        /// IdPs that are eligible and reachable.
        available: u32,
    },
    /// Fewer AS nodes than required for a service.
    #[error("Not enough AS for service {service_id}: required {required}, available {available}")]
    InsufficientAs {
        /// The service.
        service_id: String,
        /// `min_as`.
        required: u32,
        /// Eligible AS nodes.
        available: u32,
    },
    /// A service appears twice in `data_request_list`.
    #[error("Duplicate service id: {0}")]
    DuplicateServiceId(String),
    /// No such request on the ledger or locally.
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),
    /// No request was created under this reference.
    #[error("Reference id not found: {0}")]
    ReferenceNotFound(String),
    /// The request was already closed.
    #[error("Request {0} is closed")]
    RequestClosed(RequestId),
    /// The request already timed out.
    #[error("Request {0} has timed out")]
    RequestTimedOut(RequestId),
    /// The request uses another mode than the caller expected.
    #[error("Mode mismatch: expected {expected}, got {got}")]
    ModeMismatch {
        /// Mode the caller supplied.
        expected: Mode,
        /// Mode recorded on the ledger.
        got: Mode,
    },
    /// This IdP was not addressed by the request.
    #[error("Node {0} is not in the request's idp_id_list")]
    IdpNotRequested(NodeId),
    /// This IdP already responded.
    #[error("IdP {idp_id} already responded to {request_id}")]
    DuplicateResponse {
        /// The request.
        request_id: RequestId,
        /// The IdP.
        idp_id: NodeId,
    },
    /// Asserted IAL below the request minimum.
    #[error("IAL {got} is below the required {required}")]
    IalTooLow {
        /// Minimum.
        required: f64,
        /// Asserted.
        got: f64,
    },
    /// Asserted AAL below the request minimum.
    #[error("AAL {got} is below the required {required}")]
    AalTooLow {
        /// Minimum.
        required: f64,
        /// Asserted.
        got: f64,
    },
    /// A mode ≥ 2 response names no accessor.
    #[error("An accessor is required for mode {0}")]
    AccessorRequired(Mode),
    /// The accessor is unknown.
    #[error("Accessor not found: {0}")]
    AccessorNotFound(String),
    /// The accessor was revoked.
    #[error("Accessor {0} is not active")]
    AccessorInactive(String),
    /// Mode 3 needs the accessor's signature over the hashed subject.
    #[error("A secret is required for mode 3")]
    SecretRequired,
    /// The secret does not decode to a valid PKCS#1 v1.5 signature.
    #[error("Malformed secret: {0}")]
    MalformedSecret(String),
    /// The accessor signature over the request message is missing or wrong.
    #[error("Invalid accessor signature")]
    InvalidAccessorSignature,
    /// The operation is reserved to another role.
    #[error("Operation not permitted for this node: {0}")]
    WrongRole(String),
    /// The requested service is not part of the request.
    #[error("Service {service_id} is not part of request {request_id}")]
    ServiceNotRequested {
        /// The request.
        request_id: RequestId,
        /// The service.
        service_id: String,
    },
    /// No pending data request matches.
    #[error("No pending data request for {request_id}/{service_id}")]
    DataRequestNotFound {
        /// The request.
        request_id: RequestId,
        /// The service.
        service_id: String,
    },
    /// Data was already sent for this service.
    #[error("Data for {request_id}/{service_id} was already sent")]
    DataAlreadySent {
        /// The request.
        request_id: RequestId,
        /// The service.
        service_id: String,
    },
    /// The IdP has no pending consent request to answer.
    #[error("No incoming request {0} to respond to")]
    IncomingRequestNotFound(RequestId),
}

impl ErrorCode for RequestError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "REQ_INVALID_ARGUMENT",
            Self::MinIdpTooLow => "REQ_MIN_IDP_TOO_LOW",
            Self::IdpListRequired => "REQ_IDP_LIST_REQUIRED",
            Self::InsufficientIdp { .. } => "REQ_INSUFFICIENT_IDP",
            Self::InsufficientAs { .. } => "REQ_INSUFFICIENT_AS",
            Self::DuplicateServiceId(_) => "REQ_DUPLICATE_SERVICE_ID",
            Self::RequestNotFound(_) => "REQ_NOT_FOUND",
            Self::ReferenceNotFound(_) => "REQ_REFERENCE_NOT_FOUND",
            Self::RequestClosed(_) => "REQ_CLOSED",
            Self::RequestTimedOut(_) => "REQ_TIMED_OUT",
            Self::ModeMismatch { .. } => "REQ_MODE_MISMATCH",
            Self::IdpNotRequested(_) => "REQ_IDP_NOT_REQUESTED",
            Self::DuplicateResponse { .. } => "REQ_DUPLICATE_RESPONSE",
            Self::IalTooLow { .. } => "REQ_IAL_TOO_LOW",
            Self::AalTooLow { .. } => "REQ_AAL_TOO_LOW",
            Self::AccessorRequired(_) => "REQ_ACCESSOR_REQUIRED",
            Self::AccessorNotFound(_) => "REQ_ACCESSOR_NOT_FOUND",
            Self::AccessorInactive(_) => "REQ_ACCESSOR_INACTIVE",
            Self::SecretRequired => "REQ_SECRET_REQUIRED",
            Self::MalformedSecret(_) => "REQ_MALFORMED_SECRET",
            Self::InvalidAccessorSignature => "REQ_INVALID_ACCESSOR_SIGNATURE",
            Self::WrongRole(_) => "REQ_WRONG_ROLE",
            Self::ServiceNotRequested { .. } => "REQ_SERVICE_NOT_REQUESTED",
            Self::DataRequestNotFound { .. } => "REQ_DATA_REQUEST_NOT_FOUND",
            Self::DataAlreadySent { .. } => "REQ_DATA_ALREADY_SENT",
            Self::IncomingRequestNotFound(_) => "REQ_INCOMING_REQUEST_NOT_FOUND",
        }
    }
}

/// Hash, signature and proof mismatches found while validating peer data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// `sha256(message || salt)` differs from the ledger.
    #[error("Request message hash mismatch for {0}")]
    RequestMessageHashMismatch(RequestId),
    /// `sha256(params || salt)` differs from the ledger.
    #[error("Request params hash mismatch for service {0}")]
    RequestParamsHashMismatch(String),
    /// A consent signature did not verify.
    #[error("Invalid response signature from {0}")]
    InvalidResponseSignature(NodeId),
    /// The zero-knowledge proof did not verify.
    #[error("Invalid identity proof from {idp_id}: {reason}")]
    InvalidProof {
        /// The IdP whose proof failed.
        idp_id: NodeId,
        /// What failed.
        reason: String,
    },
    /// The relayed private proof does not hash to the on-chain value.
    #[error("Private proof hash mismatch from {0}")]
    PrivateProofHashMismatch(NodeId),
    /// An AS data signature did not verify or differs from the ledger.
    #[error("Invalid data signature from {0}")]
    InvalidDataSignature(NodeId),
    /// Fewer valid accepting responses than `min_idp`.
    #[error("Quorum not met: {valid} valid of {required} required")]
    QuorumNotMet {
        /// Required accepts.
        required: u32,
        /// Valid accepts found.
        valid: u32,
    },
    /// A peer message claims a sender the ledger does not back.
    #[error("Unexpected sender {0}")]
    UnexpectedSender(NodeId),
}

impl ErrorCode for IntegrityError {
    fn code(&self) -> &'static str {
        match self {
            Self::RequestMessageHashMismatch(_) => "INTEGRITY_MESSAGE_HASH_MISMATCH",
            Self::RequestParamsHashMismatch(_) => "INTEGRITY_PARAMS_HASH_MISMATCH",
            Self::InvalidResponseSignature(_) => "INTEGRITY_INVALID_RESPONSE_SIGNATURE",
            Self::InvalidProof { .. } => "ZKP_INVALID_PROOF",
            Self::PrivateProofHashMismatch(_) => "ZKP_PRIVATE_PROOF_HASH_MISMATCH",
            Self::InvalidDataSignature(_) => "INTEGRITY_INVALID_DATA_SIGNATURE",
            Self::QuorumNotMet { .. } => "INTEGRITY_QUORUM_NOT_MET",
            Self::UnexpectedSender(_) => "INTEGRITY_UNEXPECTED_SENDER",
        }
    }
}

/// Errors from key handling, signing and the proof arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A key could not be parsed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),
    /// A signature did not verify.
    #[error("Signature verification failed")]
    InvalidSignature,
    /// A value was not valid base64 or hex.
    #[error("Decode error: {0}")]
    Decode(String),
    /// A fixed-length value had the wrong size.
    #[error("Invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Modulus length.
        expected: usize,
        /// Received length.
        got: usize,
    },
    /// A value was not smaller than the modulus, or zero where forbidden.
    #[error("Value out of range for the modulus")]
    OutOfRange,
    /// The PKCS#1 v1.5 padding prefix is malformed.
    #[error("Invalid padding: {0}")]
    InvalidPadding(String),
    /// No modular inverse exists.
    #[error("Value is not invertible modulo n")]
    NotInvertible,
    /// The proof equation did not hold.
    #[error("Proof verification failed in round {0}")]
    ProofMismatch(usize),
    /// The private proofs do not hash to the committed value.
    #[error("Private proof hash mismatch")]
    ProofHashMismatch,
    /// A proof transcript has the wrong number of rounds.
    #[error("Expected {expected} proof rounds, got {got}")]
    RoundCount {
        /// Rounds the protocol runs.
        expected: usize,
        /// Rounds supplied.
        got: usize,
    },
    /// The external signing service failed.
    #[error("External signer error: {0}")]
    ExternalSigner(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::Signing(_) => "CRYPTO_SIGNING_FAILED",
            Self::InvalidSignature => "CRYPTO_INVALID_SIGNATURE",
            Self::Decode(_) => "CRYPTO_DECODE_ERROR",
            Self::InvalidLength { .. } => "ZKP_INVALID_LENGTH",
            Self::OutOfRange => "ZKP_OUT_OF_RANGE",
            Self::InvalidPadding(_) => "ZKP_INVALID_PADDING",
            Self::NotInvertible => "ZKP_NOT_INVERTIBLE",
            Self::ProofMismatch(_) => "ZKP_INVALID_PROOF",
            Self::ProofHashMismatch => "ZKP_PRIVATE_PROOF_HASH_MISMATCH",
            Self::RoundCount { .. } => "ZKP_ROUND_COUNT",
            Self::ExternalSigner(_) => "CRYPTO_EXTERNAL_SIGNER_ERROR",
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {0}: {1}")]
    Read(String, String),
    /// The file is not valid TOML for [`crate::config::NodeConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::Read(..) => "CONFIG_READ_FAILED",
            Self::Parse(_) => "CONFIG_PARSE_FAILED",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(RequestError::RequestNotFound(RequestId::from("r")).code(), "REQ_NOT_FOUND");
        assert_eq!(
            IntegrityError::InvalidProof { idp_id: NodeId::from("idp1"), reason: "x".into() }.code(),
            "ZKP_INVALID_PROOF"
        );
        assert_eq!(CryptoError::ProofMismatch(1).code(), "ZKP_INVALID_PROOF");
    }
}

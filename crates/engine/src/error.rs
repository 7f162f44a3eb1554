// Path: crates/engine/src/error.rs
//! The engine's error type and its mapping onto the error taxonomy.

use ndid_api::ledger::LedgerError;
use ndid_api::storage::StorageError;
use ndid_client::ClientError;
use ndid_networking::CodecError;
use ndid_telemetry::error_metrics;
use ndid_types::app::{NodeId, RequestId};
use ndid_types::error::{CryptoError, ErrorClass, ErrorCode, IntegrityError, RequestError};
use thiserror::Error;

/// Everything an engine operation can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("ledger call failed while {stage} ({request_id:?}): {source}")]
    Ledger {
        stage: &'static str,
        request_id: Option<RequestId>,
        #[source]
        source: LedgerError,
    },
    #[error("delivery to {node} failed while {stage}: {reason}")]
    Transport {
        stage: &'static str,
        node: NodeId,
        reason: String,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Where the error sits in the taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Request(_) => ErrorClass::Client,
            Self::Integrity(_) | Self::Codec(_) => ErrorClass::ProtocolIntegrity,
            Self::Crypto(CryptoError::Signing(_) | CryptoError::ExternalSigner(_)) => {
                ErrorClass::TransientInfrastructure
            }
            Self::Crypto(_) => ErrorClass::ProtocolIntegrity,
            Self::Ledger { .. } | Self::Transport { .. } => ErrorClass::TransientInfrastructure,
            Self::Storage(_) => ErrorClass::FatalLocal,
        }
    }

    /// Only infrastructure failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientInfrastructure
    }

    /// Logs the error with its class and counts it.
    pub(crate) fn report(&self, what: &'static str, request_id: &RequestId) {
        let class = self.class();
        error_metrics().inc_error(class.as_str(), self.code());
        match class {
            ErrorClass::Client | ErrorClass::ProtocolIntegrity => tracing::warn!(
                target: "engine",
                request_id = %request_id,
                class = class.as_str(),
                code = self.code(),
                error = %self,
                "{what} rejected"
            ),
            ErrorClass::TransientInfrastructure | ErrorClass::FatalLocal => tracing::error!(
                target: "engine",
                request_id = %request_id,
                class = class.as_str(),
                code = self.code(),
                error = %self,
                "{what} failed"
            ),
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Request(e) => e.code(),
            Self::Integrity(e) => e.code(),
            Self::Crypto(e) => e.code(),
            Self::Ledger { source, .. } => source.code(),
            Self::Transport { .. } => "TRANSPORT_DELIVERY_FAILED",
            Self::Codec(e) => e.code(),
            Self::Storage(e) => e.code(),
        }
    }
}

/// Attaches the failing stage to ledger errors.
pub(crate) trait StageExt<T> {
    fn at(self, stage: &'static str, request_id: &RequestId) -> Result<T, EngineError>;
}

impl<T> StageExt<T> for Result<T, LedgerError> {
    fn at(self, stage: &'static str, request_id: &RequestId) -> Result<T, EngineError> {
        self.map_err(|source| EngineError::Ledger {
            stage,
            request_id: Some(request_id.clone()),
            source,
        })
    }
}

impl<T> StageExt<T> for Result<T, ClientError> {
    fn at(self, stage: &'static str, request_id: &RequestId) -> Result<T, EngineError> {
        self.map_err(|e| match e {
            ClientError::Ledger(source) => EngineError::Ledger {
                stage,
                request_id: Some(request_id.clone()),
                source,
            },
            ClientError::Storage(e) => EngineError::Storage(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_the_taxonomy() {
        let client: EngineError = RequestError::MinIdpTooLow.into();
        assert_eq!(client.class(), ErrorClass::Client);
        assert!(!client.is_retryable());

        let proof: EngineError = IntegrityError::InvalidProof {
            idp_id: NodeId::from("idp1"),
            reason: "round 1".into(),
        }
        .into();
        assert_eq!(proof.class(), ErrorClass::ProtocolIntegrity);
        assert_eq!(proof.code(), "ZKP_INVALID_PROOF");

        let ledger = Err::<(), _>(LedgerError::Unavailable("down".into()))
            .at("creating request", &RequestId::from("r1"))
            .unwrap_err();
        assert!(ledger.is_retryable());
        assert_eq!(ledger.code(), "LEDGER_UNAVAILABLE");

        let store: EngineError = StorageError::Backend("disk".into()).into();
        assert_eq!(store.class(), ErrorClass::FatalLocal);
    }
}

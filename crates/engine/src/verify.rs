// Path: crates/engine/src/verify.rs
//! Judging an IdP response recorded on the ledger.
//!
//! The RP judges each response once as it arrives; the AS judges every
//! accepting response again before serving data.

use crate::error::{EngineError, StageExt};
use ndid_client::LedgerClient;
use ndid_crypto::algorithms::hash::{hash_subject, unb64};
use ndid_crypto::sign::verify_sha256;
use ndid_crypto::zkp::{self, Transcript, ZkKey};
use ndid_telemetry::engine_metrics;
use ndid_telemetry::time::ProofTimer;
use ndid_types::app::{Identity, IdpResponse, RequestDetail, ResponseValidity};
use ndid_types::error::CryptoError;

/// Off-chain proof material relayed for one response.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ProofMaterial<'a> {
    pub challenge: Option<&'a [String]>,
    pub private_proof: Option<&'a [String]>,
    pub padding: Option<&'a str>,
}

/// Checks IAL, the consent signature and, in mode 3, the identity proof.
///
/// Integrity failures become `false` entries, never errors; only ledger
/// reads can fail.
pub(crate) async fn judge_response(
    ledger: &LedgerClient,
    detail: &RequestDetail,
    response: &IdpResponse,
    request_message: &str,
    identity: &Identity,
    proof: Option<ProofMaterial<'_>>,
) -> Result<ResponseValidity, EngineError> {
    let stage = "judging response";
    let request_id = &detail.request_id;

    let key_pem = if detail.mode.uses_accessor() {
        match &response.accessor_id {
            Some(accessor_id) => ledger
                .accessor(accessor_id)
                .await
                .at(stage, request_id)?
                .map(|a| a.accessor_public_key),
            None => None,
        }
    } else {
        ledger
            .node_info(&response.idp_id)
            .await
            .at(stage, request_id)?
            .map(|n| n.public_key)
    };

    let valid_signature = match (&key_pem, unb64(&response.signature)) {
        (Some(pem), Ok(signature)) => {
            verify_sha256(pem, request_message.as_bytes(), &signature).is_ok()
        }
        _ => false,
    };

    let valid_proof = detail.mode.requires_zk_proof().then(|| {
        let _timer = ProofTimer::new(engine_metrics());
        match check_proof(key_pem.as_deref(), response, identity, proof.as_ref()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    target: "zkp",
                    request_id = %request_id,
                    idp_id = %response.idp_id,
                    error = %e,
                    "identity proof rejected"
                );
                false
            }
        }
    });

    Ok(ResponseValidity {
        idp_id: response.idp_id.clone(),
        valid_signature: Some(valid_signature),
        valid_proof,
        valid_ial: Some(response.ial >= detail.min_ial),
    })
}

fn missing(what: &str) -> CryptoError {
    CryptoError::Decode(format!("missing {what}"))
}

fn check_proof(
    accessor_pem: Option<&str>,
    response: &IdpResponse,
    identity: &Identity,
    material: Option<&ProofMaterial<'_>>,
) -> Result<(), CryptoError> {
    let pem = accessor_pem.ok_or_else(|| missing("accessor key"))?;
    let material = material.ok_or_else(|| missing("proof material"))?;
    let public_proofs = response
        .identity_proof
        .as_deref()
        .ok_or_else(|| missing("identity proof"))?;
    let private_proof_hash = response
        .private_proof_hash
        .as_deref()
        .ok_or_else(|| missing("private proof hash"))?;
    let challenges = material.challenge.ok_or_else(|| missing("challenge"))?;
    let private_proofs = material
        .private_proof
        .ok_or_else(|| missing("private proof"))?;
    let padding = unb64(material.padding.ok_or_else(|| missing("padding"))?)?;

    let key = ZkKey::from_pem(pem)?;
    zkp::verify(
        &key,
        &hash_subject(identity),
        &Transcript {
            public_proofs,
            challenges,
            private_proofs,
            padding: &padding,
            private_proof_hash,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_crypto::algorithms::hash::b64;
    use ndid_crypto::zkp::{commit, extract_padding, private_proof_hash, private_proofs};
    use ndid_test_utils::fixtures::{public_pem, sign_b64};
    use ndid_types::app::{NodeId, ResponseStatus};

    struct Proof {
        public: Vec<String>,
        challenge: Vec<String>,
        private: Vec<String>,
        padding: String,
        hash: String,
    }

    fn prove(identity: &Identity) -> Proof {
        let key = ZkKey::from_pem(public_pem("accessor1").unwrap()).unwrap();
        let secret =
            unb64(&sign_b64("accessor1", identity.canonical().as_bytes()).unwrap()).unwrap();
        let padding = extract_padding(&key, &secret, &hash_subject(identity)).unwrap();
        let commitments = commit(&key).unwrap();
        let challenge = zkp::challenges();
        let private = private_proofs(&key, &commitments, &secret, &challenge).unwrap();
        Proof {
            public: commitments.into_iter().map(|c| c.public_proof).collect(),
            hash: private_proof_hash(&private).unwrap(),
            challenge,
            private,
            padding: b64(&padding),
        }
    }

    fn response(proof: &Proof) -> IdpResponse {
        IdpResponse {
            idp_id: NodeId::from("idp1"),
            status: ResponseStatus::Accept,
            ial: 2.3,
            aal: 2.2,
            signature: String::new(),
            accessor_id: Some("accessor1".into()),
            identity_proof: Some(proof.public.clone()),
            private_proof_hash: Some(proof.hash.clone()),
        }
    }

    #[test]
    fn proof_checks_out_for_the_signed_subject() {
        let identity = Identity::new("citizen_id", "1234567890123");
        let proof = prove(&identity);
        let material = ProofMaterial {
            challenge: Some(proof.challenge.as_slice()),
            private_proof: Some(proof.private.as_slice()),
            padding: Some(proof.padding.as_str()),
        };
        let pem = public_pem("accessor1").unwrap();
        check_proof(Some(pem), &response(&proof), &identity, Some(&material)).unwrap();

        // Another subject does not verify against the same transcript.
        let other = Identity::new("citizen_id", "9999999999999");
        assert!(check_proof(Some(pem), &response(&proof), &other, Some(&material)).is_err());
    }

    #[test]
    fn missing_material_is_a_failed_proof() {
        let identity = Identity::new("citizen_id", "1234567890123");
        let proof = prove(&identity);
        let pem = public_pem("accessor1").unwrap();

        let without_challenge = ProofMaterial {
            challenge: None,
            private_proof: Some(proof.private.as_slice()),
            padding: Some(proof.padding.as_str()),
        };
        assert!(check_proof(Some(pem), &response(&proof), &identity, Some(&without_challenge)).is_err());
        assert!(check_proof(Some(pem), &response(&proof), &identity, None).is_err());
        assert!(check_proof(None, &response(&proof), &identity, Some(&ProofMaterial::default())).is_err());
    }

    #[test]
    fn swapped_challenges_fail() {
        let identity = Identity::new("citizen_id", "1234567890123");
        let proof = prove(&identity);
        let mut challenge = proof.challenge.clone();
        challenge.reverse();
        let material = ProofMaterial {
            challenge: Some(challenge.as_slice()),
            private_proof: Some(proof.private.as_slice()),
            padding: Some(proof.padding.as_str()),
        };
        let pem = public_pem("accessor1").unwrap();
        assert!(check_proof(Some(pem), &response(&proof), &identity, Some(&material)).is_err());
    }
}

// Path: crates/engine/src/idp.rs
//! The identity provider: validates consent requests and answers them.

use crate::context::{callback_error, ensure_open, NodeContext};
use crate::continuation::Committed;
use crate::error::{EngineError, StageExt};
use crate::params::CreateResponseParams;
use ndid_crypto::algorithms::hash::{b64, hash_subject, salted_hash_hex, unb64};
use ndid_crypto::sign::verify_sha256;
use ndid_crypto::zkp::{self, Commitment, ZkKey};
use ndid_types::app::{
    CallbackBody, ChallengeRequestMessage, ChallengeResponseMessage, ConsentRequestMessage,
    Continuation, CreateIdpResponseArgs, DeclareIdentityProofArgs, Identity, IdpResponseDraft,
    IdpResponseMessage, IncomingRequestRecord, LedgerFunction, Mode, NodeId, PeerMessage,
    RequestId, ResponseStatus, RetryProbe, Role, ZkSession,
};
use ndid_types::error::{IntegrityError, RequestError};

/// A consent request arrived from an RP.
pub(crate) async fn on_consent_request(
    ctx: &NodeContext,
    msg: ConsentRequestMessage,
) -> Result<(), EngineError> {
    let stage = "accepting consent request";
    let request_id = msg.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    if ctx.store.incoming(&request_id)?.is_some() {
        tracing::debug!(target: "engine", request_id = %request_id, "consent request already accepted");
        return Ok(());
    }

    let detail = ctx
        .ledger
        .request_detail(&request_id)
        .await
        .at(stage, &request_id)?
        .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
    if detail.requester_node_id != msg.rp_id {
        return Err(IntegrityError::UnexpectedSender(msg.rp_id).into());
    }
    ensure_open(&detail)?;
    if salted_hash_hex(&msg.request_message, &msg.request_message_salt)
        != detail.request_message_hash
    {
        return Err(IntegrityError::RequestMessageHashMismatch(request_id).into());
    }
    if msg.mode != detail.mode {
        return Err(RequestError::ModeMismatch {
            expected: detail.mode,
            got: msg.mode,
        }
        .into());
    }
    if !detail.idp_id_list.is_empty() && !detail.idp_id_list.contains(ctx.node_id()) {
        return Err(RequestError::IdpNotRequested(ctx.node_id().clone()).into());
    }

    let record = IncomingRequestRecord {
        message: msg,
        received_at_ms: ctx.clock.now_ms(),
    };
    if !ctx.store.insert_incoming(&record)? {
        return Ok(());
    }
    tracing::info!(
        target: "engine",
        request_id = %request_id,
        rp_id = %detail.requester_node_id,
        mode = %detail.mode,
        "consent request accepted"
    );

    let Some(url) = ctx.store.callback_urls()?.incoming_request_url else {
        tracing::warn!(target: "engine", request_id = %request_id, "no incoming request callback url set");
        return Ok(());
    };
    let message = record.message;
    let body = CallbackBody::IncomingRequest {
        request_id: request_id.clone(),
        mode: detail.mode,
        namespace: message.namespace,
        identifier: message.identifier,
        request_message: message.request_message,
        request_message_hash: detail.request_message_hash,
        request_message_salt: message.request_message_salt,
        requester_node_id: detail.requester_node_id,
        min_ial: detail.min_ial,
        min_aal: detail.min_aal,
        data_request_list: message.data_request_list,
        request_timeout: detail.request_timeout,
        creation_time: message.creation_time,
    };
    ctx.callbacks.enqueue(
        &url,
        body,
        Some(RetryProbe::RequestOpen {
            request_id: request_id.clone(),
        }),
        None,
    )?;
    Ok(())
}

/// Answers an incoming request on behalf of the subject.
///
/// Modes 1 and 2 submit the response straight away. Mode 3 first declares
/// the proof commitments and waits for the RP's challenge.
pub(crate) async fn create_response(
    ctx: &NodeContext,
    params: CreateResponseParams,
) -> Result<(), EngineError> {
    let stage = "creating response";
    ctx.ensure_role(Role::Idp, "create_response")?;
    let request_id = params.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    let incoming = ctx
        .store
        .incoming(&request_id)?
        .ok_or_else(|| RequestError::IncomingRequestNotFound(request_id.clone()))?;
    let detail = ctx.open_request(stage, &request_id).await?;
    let message = incoming.message;
    if message.mode != detail.mode {
        return Err(RequestError::ModeMismatch {
            expected: detail.mode,
            got: message.mode,
        }
        .into());
    }
    if !detail.idp_id_list.is_empty() && !detail.idp_id_list.contains(ctx.node_id()) {
        return Err(RequestError::IdpNotRequested(ctx.node_id().clone()).into());
    }
    if ctx.store.idp_draft(&request_id)?.is_some() || detail.response_of(ctx.node_id()).is_some() {
        return Err(RequestError::DuplicateResponse {
            request_id,
            idp_id: ctx.node_id().clone(),
        }
        .into());
    }
    if params.status == ResponseStatus::Accept {
        if params.ial < detail.min_ial {
            return Err(RequestError::IalTooLow {
                required: detail.min_ial,
                got: params.ial,
            }
            .into());
        }
        if params.aal < detail.min_aal {
            return Err(RequestError::AalTooLow {
                required: detail.min_aal,
                got: params.aal,
            }
            .into());
        }
    }

    let mut accessor_key = None;
    let signature = if detail.mode.uses_accessor() {
        let accessor_id = params
            .accessor_id
            .as_deref()
            .ok_or(RequestError::AccessorRequired(detail.mode))?;
        let accessor = ctx
            .ledger
            .accessor(accessor_id)
            .await
            .at(stage, &request_id)?
            .ok_or_else(|| RequestError::AccessorNotFound(accessor_id.to_string()))?;
        if !accessor.active {
            return Err(RequestError::AccessorInactive(accessor_id.to_string()).into());
        }
        let signature = params
            .signature
            .clone()
            .ok_or(RequestError::InvalidAccessorSignature)?;
        let raw = unb64(&signature).map_err(|_| RequestError::InvalidAccessorSignature)?;
        verify_sha256(
            &accessor.accessor_public_key,
            message.request_message.as_bytes(),
            &raw,
        )
        .map_err(|_| RequestError::InvalidAccessorSignature)?;
        accessor_key = Some(accessor.accessor_public_key);
        signature
    } else {
        b64(&ctx.signer.sign(message.request_message.as_bytes()).await?)
    };

    let zk = match (detail.mode.requires_zk_proof(), accessor_key) {
        (true, Some(pem)) => {
            let secret = params.secret.as_deref().ok_or(RequestError::SecretRequired)?;
            let identity = Identity::new(message.namespace.clone(), message.identifier.clone());
            Some(open_session(pem, secret, &identity)?)
        }
        _ => None,
    };

    let mut draft = IdpResponseDraft {
        request_id: request_id.clone(),
        rp_id: detail.requester_node_id.clone(),
        reference_id: params.reference_id,
        callback_url: params.callback_url,
        status: params.status,
        ial: params.ial,
        aal: params.aal,
        signature,
        accessor_id: params.accessor_id,
        zk,
        submitted: false,
    };

    if let Some(zk) = &draft.zk {
        let args = DeclareIdentityProofArgs {
            request_id: request_id.clone(),
            identity_proof: zk.public_proof.clone(),
        };
        ctx.store.put_idp_draft(&draft)?;
        let declared = ctx
            .ledger
            .transact(
                LedgerFunction::DeclareIdentityProof,
                &args,
                Some(Continuation::IdentityProofDeclared {
                    request_id: request_id.clone(),
                    rp_id: draft.rp_id.clone(),
                }),
            )
            .await
            .at(stage, &request_id);
        if let Err(e) = declared {
            ctx.store.remove_idp_draft(&request_id)?;
            return Err(e);
        }
        tracing::info!(target: "zkp", request_id = %request_id, "identity proof submitted");
        return Ok(());
    }

    draft.submitted = true;
    ctx.store.put_idp_draft(&draft)?;
    if let Err(e) = submit_response(ctx, &draft, None, None).await {
        ctx.store.remove_idp_draft(&request_id)?;
        return Err(e);
    }
    Ok(())
}

/// Checks the subject signature and draws the commitments.
fn open_session(
    accessor_public_key: String,
    secret: &str,
    identity: &Identity,
) -> Result<ZkSession, EngineError> {
    let malformed = |e: ndid_types::error::CryptoError| RequestError::MalformedSecret(e.to_string());
    let secret_bytes = unb64(secret).map_err(malformed)?;
    let key = ZkKey::from_pem(&accessor_public_key)?;
    let padding = zkp::extract_padding(&key, &secret_bytes, &hash_subject(identity))
        .map_err(malformed)?;
    let commitments = zkp::commit(&key)?;
    let (blinding, public_proof) = commitments
        .into_iter()
        .map(|c| (c.blinding, c.public_proof))
        .unzip();
    Ok(ZkSession {
        accessor_public_key,
        secret: secret.to_string(),
        padding: b64(&padding),
        blinding,
        public_proof,
        challenge: None,
        private_proof: None,
    })
}

async fn submit_response(
    ctx: &NodeContext,
    draft: &IdpResponseDraft,
    identity_proof: Option<Vec<String>>,
    private_proof_hash: Option<String>,
) -> Result<(), EngineError> {
    let args = CreateIdpResponseArgs {
        request_id: draft.request_id.clone(),
        status: draft.status,
        ial: draft.ial,
        aal: draft.aal,
        signature: draft.signature.clone(),
        accessor_id: draft.accessor_id.clone(),
        identity_proof,
        private_proof_hash,
    };
    ctx.ledger
        .transact(
            LedgerFunction::CreateIdpResponse,
            &args,
            Some(Continuation::IdpResponseCreated {
                request_id: draft.request_id.clone(),
                rp_id: draft.rp_id.clone(),
            }),
        )
        .await
        .at("submitting response", &draft.request_id)?;
    tracing::info!(
        target: "engine",
        request_id = %draft.request_id,
        status = %draft.status,
        "response submitted"
    );
    Ok(())
}

fn post_result(
    ctx: &NodeContext,
    draft: &IdpResponseDraft,
    error: Option<&EngineError>,
) -> Result<(), EngineError> {
    ctx.post(
        &draft.callback_url,
        CallbackBody::CreateResponseResult {
            reference_id: draft.reference_id.clone(),
            request_id: draft.request_id.clone(),
            success: error.is_none(),
            error: error.map(callback_error),
        },
    )
}

/// `DeclareIdentityProof` committed: ask the RP for a challenge.
pub(crate) async fn identity_proof_declared(
    ctx: &NodeContext,
    request_id: &RequestId,
    rp_id: &NodeId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "requesting challenge";
    let Some(draft) = ctx.store.idp_draft(request_id)? else {
        return Ok(());
    };
    let height = match committed.outcome(stage, request_id) {
        Ok(height) => height,
        Err(e) => {
            ctx.store.remove_idp_draft(request_id)?;
            post_result(ctx, &draft, Some(&e))?;
            return Err(e);
        }
    };
    let Some(zk) = &draft.zk else {
        return Ok(());
    };
    let message = PeerMessage::ChallengeRequest(ChallengeRequestMessage {
        request_id: request_id.clone(),
        idp_id: ctx.node_id().clone(),
        public_proof: zk.public_proof.clone(),
        height,
    });
    ctx.send_to(stage, rp_id, &message).await
}

/// The RP's challenge arrived: finish the proof and submit the response.
pub(crate) async fn on_challenge_response(
    ctx: &NodeContext,
    msg: ChallengeResponseMessage,
) -> Result<(), EngineError> {
    let stage = "answering challenge";
    let request_id = msg.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    let mut draft = ctx
        .store
        .idp_draft(&request_id)?
        .ok_or_else(|| RequestError::IncomingRequestNotFound(request_id.clone()))?;
    if draft.submitted {
        tracing::debug!(target: "zkp", request_id = %request_id, "challenge already answered");
        return Ok(());
    }
    if draft.rp_id != msg.rp_id {
        return Err(IntegrityError::UnexpectedSender(msg.rp_id).into());
    }
    ctx.open_request(stage, &request_id).await?;
    let Some(zk) = draft.zk.as_mut() else {
        let got = ctx
            .store
            .incoming(&request_id)?
            .map_or(Mode::One, |i| i.message.mode);
        return Err(RequestError::ModeMismatch {
            expected: Mode::Three,
            got,
        }
        .into());
    };

    let key = ZkKey::from_pem(&zk.accessor_public_key)?;
    let commitments: Vec<Commitment> = zk
        .blinding
        .iter()
        .zip(&zk.public_proof)
        .map(|(blinding, public_proof)| Commitment {
            blinding: blinding.clone(),
            public_proof: public_proof.clone(),
        })
        .collect();
    let secret = unb64(&zk.secret)?;
    let private_proof = zkp::private_proofs(&key, &commitments, &secret, &msg.challenge)?;
    let private_proof_hash = zkp::private_proof_hash(&private_proof)?;
    let identity_proof = zk.public_proof.clone();
    zk.challenge = Some(msg.challenge);
    zk.private_proof = Some(private_proof);

    draft.submitted = true;
    ctx.store.put_idp_draft(&draft)?;
    if let Err(e) =
        submit_response(ctx, &draft, Some(identity_proof), Some(private_proof_hash)).await
    {
        draft.submitted = false;
        if let Some(zk) = draft.zk.as_mut() {
            zk.challenge = None;
            zk.private_proof = None;
        }
        ctx.store.put_idp_draft(&draft)?;
        return Err(e);
    }
    Ok(())
}

/// `CreateIdpResponse` committed: relay the proof material and report.
pub(crate) async fn response_created(
    ctx: &NodeContext,
    request_id: &RequestId,
    rp_id: &NodeId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "relaying response";
    let Some(draft) = ctx.store.idp_draft(request_id)? else {
        return Ok(());
    };
    let height = match committed.outcome(stage, request_id) {
        Ok(height) => height,
        Err(e) => {
            ctx.store.remove_idp_draft(request_id)?;
            post_result(ctx, &draft, Some(&e))?;
            return Err(e);
        }
    };
    let zk = draft.zk.as_ref();
    let message = PeerMessage::IdpResponse(IdpResponseMessage {
        request_id: request_id.clone(),
        idp_id: ctx.node_id().clone(),
        private_proof: zk.and_then(|z| z.private_proof.clone()),
        padding: zk.map(|z| z.padding.clone()),
        height,
    });
    let sent = ctx.send_to(stage, rp_id, &message).await;
    post_result(ctx, &draft, sent.as_ref().err())?;
    if sent.is_ok() {
        tracing::info!(target: "engine", request_id = %request_id, height, "response relayed");
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_test_utils::fixtures::{public_pem, sign_b64};

    #[test]
    fn session_needs_a_signature_over_the_subject() {
        let identity = Identity::new("citizen_id", "1234567890123");
        let pem = public_pem("accessor1").unwrap().to_string();

        let secret = sign_b64("accessor1", identity.canonical().as_bytes()).unwrap();
        let session = open_session(pem.clone(), &secret, &identity).unwrap();
        assert_eq!(session.blinding.len(), session.public_proof.len());
        assert!(!session.public_proof.is_empty());
        assert!(session.challenge.is_none());

        let other = sign_b64("accessor1", b"citizen_id:9999999999999").unwrap();
        let err = open_session(pem.clone(), &other, &identity).unwrap_err();
        assert!(matches!(err, EngineError::Request(RequestError::MalformedSecret(_))));

        let err = open_session(pem, "not base64!", &identity).unwrap_err();
        assert!(matches!(err, EngineError::Request(RequestError::MalformedSecret(_))));
    }
}

// Path: crates/engine/src/rp.rs
//! The relying party: creates requests, judges responses, collects data.

use crate::context::{callback_error, NodeContext};
use crate::continuation::Committed;
use crate::error::{EngineError, StageExt};
use crate::params::CreateRequestParams;
use crate::request::{derive_status, RequestStatusReport};
use crate::verify::{judge_response, ProofMaterial};
use ndid_crypto::algorithms::hash::{random_salt, salted_hash_hex, unb64};
use ndid_crypto::sign::verify_sha256;
use ndid_crypto::zkp;
use ndid_telemetry::engine_metrics;
use ndid_types::app::{
    AsDataRecord, AsDataResponseMessage, CallbackBody, ChallengeRequestMessage,
    ChallengeResponseMessage, ConsentRequestMessage, Continuation, CreateRequestArgs, DataRequest,
    DataRequestMessage, FinishRequestArgs, Identity, IdpProofBundle, IdpResponseMessage,
    LedgerFunction, LedgerServiceRequest, Mode, NodeId, PeerMessage, RequestDetail, RequestId,
    RequestRecord, RequestStatus, ResponseStatus, Role, ServiceDataRequest, SetDataReceivedArgs,
};
use ndid_types::error::{IntegrityError, RequestError};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

const SALT_BYTES: usize = 16;
/// Delay before a timeout that could not be recorded is tried again.
const TIMEOUT_RETRY: Duration = Duration::from_secs(5);

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Validates the arguments that need no ledger read.
fn validate(params: &CreateRequestParams, timeout_secs: u64) -> Result<(), RequestError> {
    if params.min_idp < 1 {
        return Err(RequestError::MinIdpTooLow);
    }
    if params.mode == Mode::One && params.idp_id_list.is_empty() {
        return Err(RequestError::IdpListRequired);
    }
    if !params.idp_id_list.is_empty() && count(params.idp_id_list.len()) < params.min_idp {
        return Err(RequestError::InsufficientIdp {
            required: params.min_idp,
            available: count(params.idp_id_list.len()),
        });
    }
    let mut seen = HashSet::new();
    for service in &params.data_request_list {
        if !seen.insert(service.service_id.as_str()) {
            return Err(RequestError::DuplicateServiceId(service.service_id.clone()));
        }
        if service.min_as < 1 {
            return Err(RequestError::InvalidArgument(format!(
                "min_as of {} must be at least 1",
                service.service_id
            )));
        }
    }
    if timeout_secs == 0 {
        return Err(RequestError::InvalidArgument(
            "request_timeout must be positive".into(),
        ));
    }
    if params.reference_id.is_empty() || params.callback_url.is_empty() {
        return Err(RequestError::InvalidArgument(
            "reference_id and callback_url are required".into(),
        ));
    }
    Ok(())
}

/// The hashed form of the services, as written to the ledger and shown to IdPs.
fn ledger_services(services: &[DataRequest]) -> Vec<LedgerServiceRequest> {
    services
        .iter()
        .map(|s| LedgerServiceRequest {
            service_id: s.service_id.clone(),
            as_id_list: s.as_id_list.clone(),
            min_as: s.min_as,
            request_params_hash: salted_hash_hex(&s.request_params, &s.request_params_salt),
        })
        .collect()
}

/// Creates a request and submits it to the ledger.
///
/// Returns the request id once the transaction is broadcast. Consent
/// requests go out after it commits. A reference id that is already bound
/// returns the id it is bound to without creating anything.
pub(crate) async fn create_request(
    ctx: &NodeContext,
    params: CreateRequestParams,
) -> Result<RequestId, EngineError> {
    let stage = "creating request";
    ctx.ensure_role(Role::Rp, "create_request")?;
    if let Some(existing) = ctx.store.request_by_reference(&params.reference_id)? {
        tracing::debug!(target: "engine", reference_id = %params.reference_id, request_id = %existing, "reference already used");
        return Ok(existing);
    }
    let timeout_secs = params
        .request_timeout
        .unwrap_or(ctx.config.default_request_timeout_secs);
    validate(&params, timeout_secs)?;

    let request_id = RequestId::new(hex::encode(rand::random::<[u8; 32]>()));

    let idps = ctx
        .ledger
        .idp_nodes(params.min_ial, params.min_aal, &params.idp_id_list)
        .await
        .at(stage, &request_id)?;
    let mut idp_id_list = Vec::with_capacity(idps.len());
    for idp in idps {
        if ctx
            .ledger
            .peer_address(&idp.node_id)
            .await
            .at(stage, &request_id)?
            .is_some()
        {
            idp_id_list.push(idp.node_id);
        }
    }
    if count(idp_id_list.len()) < params.min_idp {
        return Err(RequestError::InsufficientIdp {
            required: params.min_idp,
            available: count(idp_id_list.len()),
        }
        .into());
    }

    let mut data_request_list = Vec::with_capacity(params.data_request_list.len());
    for service in params.data_request_list {
        let offered = ctx
            .ledger
            .as_nodes(&service.service_id)
            .await
            .at(stage, &request_id)?;
        let as_id_list: Vec<NodeId> = offered
            .into_iter()
            .filter(|a| service.as_id_list.is_empty() || service.as_id_list.contains(&a.node_id))
            .filter(|a| params.min_ial >= a.min_ial && params.min_aal >= a.min_aal)
            .map(|a| a.node_id)
            .collect();
        if count(as_id_list.len()) < service.min_as {
            return Err(RequestError::InsufficientAs {
                service_id: service.service_id,
                required: service.min_as,
                available: count(as_id_list.len()),
            }
            .into());
        }
        data_request_list.push(DataRequest {
            service_id: service.service_id,
            as_id_list,
            min_as: service.min_as,
            request_params: service.request_params,
            request_params_salt: random_salt(SALT_BYTES),
        });
    }

    let request_message_salt = random_salt(SALT_BYTES);
    let request_message_hash = salted_hash_hex(&params.request_message, &request_message_salt);
    let record = RequestRecord {
        request_id: request_id.clone(),
        reference_id: params.reference_id,
        callback_url: params.callback_url,
        mode: params.mode,
        identity: Identity::new(params.namespace, params.identifier),
        request_message: params.request_message,
        request_message_salt,
        idp_id_list,
        min_idp: params.min_idp,
        min_ial: params.min_ial,
        min_aal: params.min_aal,
        request_timeout: timeout_secs,
        data_request_list,
        created_at_ms: ctx.clock.now_ms(),
        data_request_forwarded: false,
        response_validity: Vec::new(),
    };
    let args = CreateRequestArgs {
        request_id: request_id.clone(),
        mode: record.mode,
        min_idp: record.min_idp,
        min_ial: record.min_ial,
        min_aal: record.min_aal,
        request_timeout: record.request_timeout,
        idp_id_list: record.idp_id_list.clone(),
        data_request_list: ledger_services(&record.data_request_list),
        request_message_hash,
    };

    let _guard = ctx.locks.lock(&request_id).await;
    if let Some(existing) = ctx.store.bind_reference(&record.reference_id, &request_id)? {
        return Ok(existing);
    }
    ctx.store.put_request(&record)?;
    let deadline_ms = record
        .created_at_ms
        .saturating_add(timeout_secs.saturating_mul(1000));
    ctx.timeouts.arm(&request_id, deadline_ms)?;

    let submitted = ctx
        .ledger
        .transact(
            LedgerFunction::CreateRequest,
            &args,
            Some(Continuation::RequestCreated {
                request_id: request_id.clone(),
            }),
        )
        .await
        .at(stage, &request_id);
    if let Err(e) = submitted {
        ctx.timeouts.disarm(&request_id)?;
        ctx.store.release_reference(&record.reference_id)?;
        return Err(e);
    }

    engine_metrics().inc_requests_created();
    tracing::info!(
        target: "engine",
        request_id = %request_id,
        reference_id = %record.reference_id,
        mode = %record.mode,
        idps = record.idp_id_list.len(),
        services = record.data_request_list.len(),
        "request submitted"
    );
    Ok(request_id)
}

/// `CreateRequest` committed: report it and ask the IdPs for consent.
pub(crate) async fn request_created(
    ctx: &NodeContext,
    request_id: &RequestId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "announcing request";
    let Some(record) = ctx.store.request(request_id)? else {
        return Ok(());
    };
    let height = match committed.outcome(stage, request_id) {
        Ok(height) => height,
        Err(e) => {
            ctx.timeouts.disarm(request_id)?;
            ctx.store.release_reference(&record.reference_id)?;
            ctx.post(
                &record.callback_url,
                CallbackBody::CreateRequestResult {
                    reference_id: record.reference_id.clone(),
                    request_id: request_id.clone(),
                    success: false,
                    creation_block_height: None,
                    error: Some(callback_error(&e)),
                },
            )?;
            return Err(e);
        }
    };
    ctx.post(
        &record.callback_url,
        CallbackBody::CreateRequestResult {
            reference_id: record.reference_id.clone(),
            request_id: request_id.clone(),
            success: true,
            creation_block_height: Some(height),
            error: None,
        },
    )?;

    let message = ConsentRequestMessage {
        request_id: request_id.clone(),
        mode: record.mode,
        namespace: record.identity.namespace.clone(),
        identifier: record.identity.identifier.clone(),
        request_message: record.request_message.clone(),
        request_message_salt: record.request_message_salt.clone(),
        min_idp: record.min_idp,
        min_ial: record.min_ial,
        min_aal: record.min_aal,
        request_timeout: record.request_timeout,
        data_request_list: ledger_services(&record.data_request_list),
        rp_id: ctx.node_id().clone(),
        creation_time: record.created_at_ms,
        height,
    };
    let message = PeerMessage::ConsentRequest(message);
    for idp in &record.idp_id_list {
        if let Err(e) = ctx.send_to(stage, idp, &message).await {
            e.report("consent request", request_id);
        }
    }
    tracing::info!(target: "engine", request_id = %request_id, height, "request created");
    Ok(())
}

/// An IdP declared its commitments and wants a challenge.
pub(crate) async fn on_challenge_request(
    ctx: &NodeContext,
    msg: ChallengeRequestMessage,
) -> Result<(), EngineError> {
    let stage = "issuing challenge";
    let request_id = msg.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    let record = ctx
        .store
        .request(&request_id)?
        .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
    if record.mode != Mode::Three {
        return Err(RequestError::ModeMismatch {
            expected: Mode::Three,
            got: record.mode,
        }
        .into());
    }
    let detail = ctx.open_request(stage, &request_id).await?;
    if !detail.idp_id_list.contains(&msg.idp_id) {
        return Err(RequestError::IdpNotRequested(msg.idp_id).into());
    }
    let declared = ctx
        .ledger
        .identity_proof(&request_id, &msg.idp_id)
        .await
        .at(stage, &request_id)?;
    if declared.as_deref() != Some(msg.public_proof.as_slice()) {
        return Err(IntegrityError::InvalidProof {
            idp_id: msg.idp_id,
            reason: "commitments differ from the declared identity proof".into(),
        }
        .into());
    }

    // A repeated request gets the challenge issued the first time.
    let challenge = ctx
        .store
        .challenge_or_insert(&request_id, &msg.idp_id, &zkp::challenges())?;
    let reply = PeerMessage::ChallengeResponse(ChallengeResponseMessage {
        request_id: request_id.clone(),
        rp_id: ctx.node_id().clone(),
        challenge,
        height: ctx.ledger.latest_height(),
    });
    ctx.send_to(stage, &msg.idp_id, &reply).await?;
    tracing::debug!(target: "zkp", request_id = %request_id, idp_id = %msg.idp_id, "challenge issued");
    Ok(())
}

/// An IdP's response is on chain: judge it once and move the request on.
pub(crate) async fn on_idp_response(
    ctx: &NodeContext,
    msg: IdpResponseMessage,
) -> Result<(), EngineError> {
    let stage = "judging response";
    let request_id = msg.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    let mut record = ctx
        .store
        .request(&request_id)?
        .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
    let detail = ctx
        .ledger
        .request_detail(&request_id)
        .await
        .at(stage, &request_id)?
        .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
    if detail.is_finished() {
        tracing::debug!(target: "engine", request_id = %request_id, idp_id = %msg.idp_id, "response after the request ended");
        return Ok(());
    }
    let response = detail
        .response_of(&msg.idp_id)
        .ok_or_else(|| IntegrityError::UnexpectedSender(msg.idp_id.clone()))?;
    if record.validity_of(&msg.idp_id).is_some() {
        tracing::debug!(target: "engine", request_id = %request_id, idp_id = %msg.idp_id, "response already judged");
        return Ok(());
    }

    let challenge = if record.mode.requires_zk_proof() {
        ctx.store.put_idp_proof(&msg)?;
        ctx.store.challenge(&request_id, &msg.idp_id)?
    } else {
        None
    };
    let material = record.mode.requires_zk_proof().then(|| ProofMaterial {
        challenge: challenge.as_deref(),
        private_proof: msg.private_proof.as_deref(),
        padding: msg.padding.as_deref(),
    });
    let validity = judge_response(
        &ctx.ledger,
        &detail,
        response,
        &record.request_message,
        &record.identity,
        material,
    )
    .await?;
    engine_metrics().inc_responses_judged(validity.is_valid());
    tracing::info!(
        target: "engine",
        request_id = %request_id,
        idp_id = %msg.idp_id,
        status = %response.status,
        valid = validity.is_valid(),
        "response judged"
    );
    record.record_validity(validity);
    ctx.store.put_request(&record)?;
    ctx.post_status(&record, &detail)?;

    forward_data_requests(ctx, &mut record, &detail).await?;
    maybe_auto_close(ctx, &record, &detail).await
}

/// Sends each AS its services once `min_idp` valid accepts are in.
async fn forward_data_requests(
    ctx: &NodeContext,
    record: &mut RequestRecord,
    detail: &RequestDetail,
) -> Result<(), EngineError> {
    if record.data_request_forwarded || record.data_request_list.is_empty() {
        return Ok(());
    }
    let accepted: Vec<&NodeId> = detail
        .responses
        .iter()
        .filter(|r| r.status == ResponseStatus::Accept)
        .filter(|r| record.validity_of(&r.idp_id).is_some_and(|v| v.is_valid()))
        .map(|r| &r.idp_id)
        .collect();
    if count(accepted.len()) < record.min_idp {
        return Ok(());
    }

    let mut idp_proofs = Vec::new();
    if record.mode.requires_zk_proof() {
        for proof in ctx.store.idp_proofs(&record.request_id)? {
            if !accepted.contains(&&proof.idp_id) {
                continue;
            }
            let challenge = ctx.store.challenge(&record.request_id, &proof.idp_id)?;
            if let (Some(challenge), Some(private_proof), Some(padding)) =
                (challenge, proof.private_proof, proof.padding)
            {
                idp_proofs.push(IdpProofBundle {
                    idp_id: proof.idp_id,
                    challenge,
                    private_proof,
                    padding,
                });
            }
        }
    }

    let mut per_as: BTreeMap<&NodeId, Vec<ServiceDataRequest>> = BTreeMap::new();
    for service in &record.data_request_list {
        for as_id in &service.as_id_list {
            per_as.entry(as_id).or_default().push(ServiceDataRequest {
                service_id: service.service_id.clone(),
                request_params: service.request_params.clone(),
                request_params_salt: service.request_params_salt.clone(),
            });
        }
    }

    let height = ctx.ledger.latest_height();
    for (as_id, services) in per_as {
        let message = PeerMessage::DataRequest(DataRequestMessage {
            request_id: record.request_id.clone(),
            mode: record.mode,
            namespace: record.identity.namespace.clone(),
            identifier: record.identity.identifier.clone(),
            request_message: record.request_message.clone(),
            request_message_salt: record.request_message_salt.clone(),
            service_data_request_list: services,
            idp_proofs: idp_proofs.clone(),
            rp_id: ctx.node_id().clone(),
            creation_time: record.created_at_ms,
            height,
        });
        if let Err(e) = ctx.send_to("forwarding data request", as_id, &message).await {
            e.report("data request", &record.request_id);
        }
    }

    record.data_request_forwarded = true;
    ctx.store.put_request(record)?;
    tracing::info!(target: "engine", request_id = %record.request_id, "data requests forwarded");
    Ok(())
}

async fn maybe_auto_close(
    ctx: &NodeContext,
    record: &RequestRecord,
    detail: &RequestDetail,
) -> Result<(), EngineError> {
    if !ctx.config.auto_close_on_completed
        || detail.is_finished()
        || derive_status(detail, &record.response_validity) != RequestStatus::Completed
    {
        return Ok(());
    }
    tracing::debug!(target: "engine", request_id = %record.request_id, "completed, closing");
    close_locked(ctx, record).await
}

/// Closes a request this node created.
pub(crate) async fn close_request(
    ctx: &NodeContext,
    request_id: &RequestId,
) -> Result<(), EngineError> {
    ctx.ensure_role(Role::Rp, "close_request")?;
    let _guard = ctx.locks.lock(request_id).await;
    let record = ctx
        .store
        .request(request_id)?
        .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
    ctx.open_request("closing request", request_id).await?;
    close_locked(ctx, &record).await
}

async fn close_locked(ctx: &NodeContext, record: &RequestRecord) -> Result<(), EngineError> {
    let request_id = &record.request_id;
    let args = FinishRequestArgs {
        request_id: request_id.clone(),
        response_valid_list: record.response_validity.clone(),
    };
    ctx.ledger
        .transact(
            LedgerFunction::CloseRequest,
            &args,
            Some(Continuation::RequestClosed {
                request_id: request_id.clone(),
            }),
        )
        .await
        .at("closing request", request_id)?;
    tracing::info!(target: "engine", request_id = %request_id, "close submitted");
    Ok(())
}

/// `CloseRequest` committed.
pub(crate) async fn request_closed(
    ctx: &NodeContext,
    request_id: &RequestId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "closing request";
    let Some(record) = ctx.store.request(request_id)? else {
        return Ok(());
    };
    if let Err(e) = committed.outcome(stage, request_id) {
        let detail = ctx
            .ledger
            .request_detail(request_id)
            .await
            .at(stage, request_id)?;
        if detail.is_some_and(|d| d.closed) {
            // A second close lost the race against the first.
            return Ok(());
        }
        ctx.post(
            &record.callback_url,
            CallbackBody::CloseRequestResult {
                reference_id: record.reference_id.clone(),
                request_id: request_id.clone(),
                success: false,
                error: Some(callback_error(&e)),
            },
        )?;
        return Err(e);
    }

    ctx.timeouts.disarm(request_id)?;
    ctx.store.purge_request_sessions(request_id)?;
    ctx.post(
        &record.callback_url,
        CallbackBody::CloseRequestResult {
            reference_id: record.reference_id.clone(),
            request_id: request_id.clone(),
            success: true,
            error: None,
        },
    )?;
    if let Some(detail) = ctx
        .ledger
        .request_detail(request_id)
        .await
        .at(stage, request_id)?
    {
        ctx.post_status(&record, &detail)?;
    }
    tracing::info!(target: "engine", request_id = %request_id, "request closed");
    Ok(())
}

/// An AS delivered data for one service.
pub(crate) async fn on_as_data(
    ctx: &NodeContext,
    msg: AsDataResponseMessage,
) -> Result<(), EngineError> {
    let stage = "receiving data";
    let request_id = msg.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    if ctx.store.request(&request_id)?.is_none() {
        return Err(RequestError::RequestNotFound(request_id).into());
    }
    let detail = ctx.open_request(stage, &request_id).await?;
    let service = detail.service(&msg.service_id).ok_or_else(|| {
        RequestError::ServiceNotRequested {
            request_id: request_id.clone(),
            service_id: msg.service_id.clone(),
        }
    })?;
    if !service.answered_as_id_list.contains(&msg.as_id) {
        return Err(IntegrityError::UnexpectedSender(msg.as_id).into());
    }
    if service.received_data_from_list.contains(&msg.as_id) {
        tracing::debug!(target: "engine", request_id = %request_id, as_id = %msg.as_id, "data already recorded");
        return Ok(());
    }

    let key = ctx
        .ledger
        .node_info(&msg.as_id)
        .await
        .at(stage, &request_id)?
        .map(|n| n.public_key);
    let on_chain = ctx
        .ledger
        .data_signature(&request_id, &msg.service_id, &msg.as_id)
        .await
        .at(stage, &request_id)?;
    let signed = format!("{}{}", msg.data, msg.data_salt);
    let verified = match (key, unb64(&msg.signature)) {
        (Some(pem), Ok(signature)) => verify_sha256(&pem, signed.as_bytes(), &signature).is_ok(),
        _ => false,
    };
    if !verified || on_chain.as_deref() != Some(msg.signature.as_str()) {
        return Err(IntegrityError::InvalidDataSignature(msg.as_id).into());
    }

    let stored = ctx.store.insert_as_data(&AsDataRecord {
        request_id: request_id.clone(),
        service_id: msg.service_id.clone(),
        as_id: msg.as_id.clone(),
        data: msg.data,
        data_salt: msg.data_salt,
        signature: msg.signature,
    })?;
    if !stored {
        // An earlier copy of this message has a receipt in flight.
        tracing::debug!(target: "engine", request_id = %request_id, as_id = %msg.as_id, "duplicate data");
        return Ok(());
    }

    let submitted = ctx
        .ledger
        .transact(
            LedgerFunction::SetDataReceived,
            &SetDataReceivedArgs {
                request_id: request_id.clone(),
                service_id: msg.service_id.clone(),
                as_id: msg.as_id.clone(),
            },
            Some(Continuation::DataReceivedRecorded {
                request_id: request_id.clone(),
                service_id: msg.service_id.clone(),
                as_id: msg.as_id.clone(),
            }),
        )
        .await
        .at(stage, &request_id);
    if let Err(e) = submitted {
        ctx.store
            .remove_as_data(&request_id, &msg.service_id, &msg.as_id)?;
        return Err(e);
    }
    tracing::info!(
        target: "engine",
        request_id = %request_id,
        service_id = %msg.service_id,
        as_id = %msg.as_id,
        "data received"
    );
    Ok(())
}

/// `SetDataReceived` committed: report and close if that completed the request.
pub(crate) async fn data_received_recorded(
    ctx: &NodeContext,
    request_id: &RequestId,
    service_id: &str,
    as_id: &NodeId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "recording data receipt";
    let Some(record) = ctx.store.request(request_id)? else {
        return Ok(());
    };
    let Some(detail) = ctx
        .ledger
        .request_detail(request_id)
        .await
        .at(stage, request_id)?
    else {
        return Ok(());
    };
    if let Err(e) = committed.outcome(stage, request_id) {
        let recorded = detail
            .service(service_id)
            .is_some_and(|s| s.received_data_from_list.contains(as_id));
        if !recorded {
            ctx.store.remove_as_data(request_id, service_id, as_id)?;
            return Err(e);
        }
    }
    ctx.post_status(&record, &detail)?;
    maybe_auto_close(ctx, &record, &detail).await
}

/// The request deadline passed.
pub(crate) async fn on_timeout(ctx: &NodeContext, request_id: &RequestId) -> Result<(), EngineError> {
    let stage = "timing out request";
    ctx.timeouts.fired(request_id);
    let _guard = ctx.locks.lock(request_id).await;
    if !ctx.store.has_timeout(request_id)? {
        return Ok(());
    }
    let detail = match ctx
        .ledger
        .request_detail(request_id)
        .await
        .at(stage, request_id)
    {
        Ok(detail) => detail,
        Err(e) => {
            ctx.timeouts.retry_after(request_id, TIMEOUT_RETRY);
            return Err(e);
        }
    };
    match detail {
        // CreateRequest is still on its way to a block.
        None => {
            tracing::debug!(target: "timeout", request_id = %request_id, "request not on the ledger yet");
            ctx.timeouts.retry_after(request_id, TIMEOUT_RETRY);
            return Ok(());
        }
        Some(d) if d.is_finished() => {
            ctx.timeouts.disarm(request_id)?;
            return Ok(());
        }
        Some(_) => {}
    }

    let response_valid_list = ctx
        .store
        .request(request_id)?
        .map(|r| r.response_validity)
        .unwrap_or_default();
    engine_metrics().inc_timeouts_fired();
    let submitted = ctx
        .ledger
        .transact(
            LedgerFunction::TimeOutRequest,
            &FinishRequestArgs {
                request_id: request_id.clone(),
                response_valid_list,
            },
            Some(Continuation::RequestTimedOut {
                request_id: request_id.clone(),
            }),
        )
        .await
        .at(stage, request_id);
    if let Err(e) = submitted {
        ctx.timeouts.retry_after(request_id, TIMEOUT_RETRY);
        return Err(e);
    }
    tracing::info!(target: "timeout", request_id = %request_id, "timeout submitted");
    Ok(())
}

/// `TimeOutRequest` committed.
pub(crate) async fn request_timed_out(
    ctx: &NodeContext,
    request_id: &RequestId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "timing out request";
    if let Err(e) = committed.outcome(stage, request_id) {
        let detail = ctx
            .ledger
            .request_detail(request_id)
            .await
            .at(stage, request_id)?;
        if detail.is_some_and(|d| d.is_finished()) {
            ctx.timeouts.disarm(request_id)?;
            return Ok(());
        }
        ctx.timeouts.retry_after(request_id, TIMEOUT_RETRY);
        return Err(e);
    }

    ctx.timeouts.disarm(request_id)?;
    ctx.store.purge_request_sessions(request_id)?;
    let record = ctx.store.request(request_id)?;
    let detail = ctx
        .ledger
        .request_detail(request_id)
        .await
        .at(stage, request_id)?;
    if let (Some(record), Some(detail)) = (record, detail) {
        ctx.post_status(&record, &detail)?;
    }
    tracing::info!(target: "timeout", request_id = %request_id, "request timed out");
    Ok(())
}

pub(crate) async fn get_request_status(
    ctx: &NodeContext,
    request_id: &RequestId,
) -> Result<RequestStatusReport, EngineError> {
    let detail = ctx
        .ledger
        .request_detail(request_id)
        .await
        .at("reading request status", request_id)?
        .ok_or_else(|| RequestError::RequestNotFound(request_id.clone()))?;
    let record = ctx.store.request(request_id)?;
    Ok(RequestStatusReport::new(
        &detail,
        record.as_ref(),
        ctx.ledger.latest_height(),
    ))
}

pub(crate) fn request_id_by_reference(
    ctx: &NodeContext,
    reference_id: &str,
) -> Result<RequestId, EngineError> {
    ctx.store
        .request_by_reference(reference_id)?
        .ok_or_else(|| RequestError::ReferenceNotFound(reference_id.to_string()).into())
}

/// Data the AS nodes delivered for a request this node created.
pub(crate) fn get_data_from_as(
    ctx: &NodeContext,
    request_id: &RequestId,
) -> Result<Vec<AsDataRecord>, EngineError> {
    ctx.ensure_role(Role::Rp, "get_data_from_as")?;
    if ctx.store.request(request_id)?.is_none() {
        return Err(RequestError::RequestNotFound(request_id.clone()).into());
    }
    Ok(ctx.store.as_data(request_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ServiceRequestParams;

    fn params() -> CreateRequestParams {
        CreateRequestParams {
            reference_id: "ref-1".into(),
            callback_url: "http://rp.test/cb".into(),
            mode: Mode::One,
            namespace: "citizen_id".into(),
            identifier: "1234567890123".into(),
            idp_id_list: vec![NodeId::from("idp1")],
            data_request_list: vec![],
            request_message: "consent?".into(),
            min_ial: 1.1,
            min_aal: 1.0,
            min_idp: 1,
            request_timeout: Some(60),
        }
    }

    fn service(id: &str, min_as: u32) -> ServiceRequestParams {
        ServiceRequestParams {
            service_id: id.into(),
            as_id_list: vec![],
            min_as,
            request_params: "{}".into(),
        }
    }

    #[test]
    fn argument_checks() {
        assert!(validate(&params(), 60).is_ok());

        let mut p = params();
        p.min_idp = 0;
        assert_eq!(validate(&p, 60), Err(RequestError::MinIdpTooLow));

        let mut p = params();
        p.idp_id_list.clear();
        assert_eq!(validate(&p, 60), Err(RequestError::IdpListRequired));
        p.mode = Mode::Two;
        assert!(validate(&p, 60).is_ok());

        let mut p = params();
        p.min_idp = 2;
        assert!(matches!(
            validate(&p, 60),
            Err(RequestError::InsufficientIdp { required: 2, available: 1 })
        ));

        let mut p = params();
        p.data_request_list = vec![service("bank_statement", 1), service("bank_statement", 1)];
        assert!(matches!(validate(&p, 60), Err(RequestError::DuplicateServiceId(_))));

        let mut p = params();
        p.data_request_list = vec![service("bank_statement", 0)];
        assert!(matches!(validate(&p, 60), Err(RequestError::InvalidArgument(_))));

        assert!(matches!(validate(&params(), 0), Err(RequestError::InvalidArgument(_))));
    }

    #[test]
    fn ledger_services_hash_params_with_their_salt() {
        let services = vec![DataRequest {
            service_id: "bank_statement".into(),
            as_id_list: vec![NodeId::from("as1")],
            min_as: 1,
            request_params: "{\"format\":\"pdf\"}".into(),
            request_params_salt: "c2FsdA==".into(),
        }];
        let hashed = ledger_services(&services);
        assert_eq!(hashed.len(), 1);
        assert_eq!(
            hashed.first().map(|s| s.request_params_hash.clone()),
            Some(salted_hash_hex("{\"format\":\"pdf\"}", "c2FsdA=="))
        );
        assert!(hashed.iter().all(|s| s.request_params_hash != services[0].request_params));
    }
}

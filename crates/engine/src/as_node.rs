// Path: crates/engine/src/as_node.rs
//! The data provider: serves consented data requests.

use crate::context::{callback_error, ensure_open, NodeContext};
use crate::continuation::Committed;
use crate::error::{EngineError, StageExt};
use crate::params::SendDataParams;
use crate::verify::{judge_response, ProofMaterial};
use ndid_crypto::algorithms::hash::{b64, random_salt, salted_hash_hex};
use ndid_types::app::{
    AsDataResponseMessage, AsRequestRecord, AsServiceState, CallbackBody, Continuation,
    DataRequestMessage, Identity, LedgerFunction, NodeId, PeerMessage, RequestId,
    ResponseHandler, ResponseStatus, RetryProbe, Role, SignDataArgs, SignedData,
};
use ndid_types::error::{IntegrityError, RequestError};
use serde_json::Value;

const SALT_BYTES: usize = 16;

/// A data request arrived from an RP.
///
/// Every accepting IdP response is judged again here; the request is only
/// served when at least `min_idp` of them hold up.
pub(crate) async fn on_data_request(
    ctx: &NodeContext,
    msg: DataRequestMessage,
) -> Result<(), EngineError> {
    let stage = "accepting data request";
    let request_id = msg.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    if ctx.store.as_request(&request_id)?.is_some() {
        tracing::debug!(target: "engine", request_id = %request_id, "data request already accepted");
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
    if msg.mode != detail.mode {
        return Err(RequestError::ModeMismatch {
            expected: detail.mode,
            got: msg.mode,
        }
        .into());
    }
    if salted_hash_hex(&msg.request_message, &msg.request_message_salt)
        != detail.request_message_hash
    {
        return Err(IntegrityError::RequestMessageHashMismatch(request_id).into());
    }
    for service in &msg.service_data_request_list {
        let on_chain = detail
            .service(&service.service_id)
            .filter(|s| s.as_id_list.contains(ctx.node_id()))
            .ok_or_else(|| RequestError::ServiceNotRequested {
                request_id: request_id.clone(),
                service_id: service.service_id.clone(),
            })?;
        if salted_hash_hex(&service.request_params, &service.request_params_salt)
            != on_chain.request_params_hash
        {
            return Err(IntegrityError::RequestParamsHashMismatch(service.service_id.clone()).into());
        }
    }

    let identity = Identity::new(msg.namespace.clone(), msg.identifier.clone());
    let mut verified_idps: Vec<NodeId> = Vec::new();
    for response in detail
        .responses
        .iter()
        .filter(|r| r.status == ResponseStatus::Accept)
    {
        let bundle = msg.idp_proofs.iter().find(|b| b.idp_id == response.idp_id);
        let material = detail.mode.requires_zk_proof().then(|| ProofMaterial {
            challenge: bundle.map(|b| b.challenge.as_slice()),
            private_proof: bundle.map(|b| b.private_proof.as_slice()),
            padding: bundle.map(|b| b.padding.as_str()),
        });
        let validity = judge_response(
            &ctx.ledger,
            &detail,
            response,
            &msg.request_message,
            &identity,
            material,
        )
        .await?;
        if validity.is_valid() {
            verified_idps.push(response.idp_id.clone());
        } else {
            tracing::debug!(target: "engine", request_id = %request_id, idp_id = %response.idp_id, "response does not hold up");
        }
    }
    let valid = u32::try_from(verified_idps.len()).unwrap_or(u32::MAX);
    if valid < detail.min_idp {
        return Err(IntegrityError::QuorumNotMet {
            required: detail.min_idp,
            valid,
        }
        .into());
    }

    let services = msg
        .service_data_request_list
        .iter()
        .map(|s| AsServiceState {
            service_id: s.service_id.clone(),
            request_params: s.request_params.clone(),
            callback_queued: false,
            signed: None,
            data_sent: false,
        })
        .collect();
    let mut record = AsRequestRecord {
        message: msg,
        verified_idps,
        services,
    };
    if !ctx.store.insert_as_request(&record)? {
        return Ok(());
    }
    tracing::info!(
        target: "engine",
        request_id = %request_id,
        rp_id = %record.message.rp_id,
        verified = record.verified_idps.len(),
        "data request accepted"
    );

    let urls = ctx.store.callback_urls()?;
    let AsRequestRecord {
        message,
        verified_idps,
        services,
    } = &mut record;
    for service in services.iter_mut() {
        let Some(url) = urls.data_request_urls.get(&service.service_id) else {
            tracing::warn!(
                target: "engine",
                request_id = %request_id,
                service_id = %service.service_id,
                "no data request callback url set for service"
            );
            continue;
        };
        let body = CallbackBody::DataRequest {
            request_id: request_id.clone(),
            mode: message.mode,
            namespace: message.namespace.clone(),
            identifier: message.identifier.clone(),
            service_id: service.service_id.clone(),
            request_params: service.request_params.clone(),
            requester_node_id: message.rp_id.clone(),
            response_idp_id_list: verified_idps.clone(),
        };
        ctx.callbacks.enqueue(
            url,
            body,
            Some(RetryProbe::RequestOpen {
                request_id: request_id.clone(),
            }),
            Some(ResponseHandler::AsServiceData {
                request_id: request_id.clone(),
                service_id: service.service_id.clone(),
            }),
        )?;
        service.callback_queued = true;
    }
    ctx.store.put_as_request(&record)?;
    Ok(())
}

/// Signs data for one service, records the signature and relays the data
/// once it commits.
pub(crate) async fn process_data_request(
    ctx: &NodeContext,
    params: SendDataParams,
) -> Result<(), EngineError> {
    let stage = "sending data";
    ctx.ensure_role(Role::As, "process_data_request")?;
    let request_id = params.request_id.clone();
    let _guard = ctx.locks.lock(&request_id).await;
    let not_found = || RequestError::DataRequestNotFound {
        request_id: params.request_id.clone(),
        service_id: params.service_id.clone(),
    };
    let mut record = ctx.store.as_request(&request_id)?.ok_or_else(not_found)?;
    let service = record.service(&params.service_id).ok_or_else(not_found)?;
    if service.data_sent || service.signed.is_some() {
        return Err(RequestError::DataAlreadySent {
            request_id,
            service_id: params.service_id,
        }
        .into());
    }
    ctx.open_request(stage, &request_id).await?;

    let data_salt = random_salt(SALT_BYTES);
    let signed_input = format!("{}{}", params.data, data_salt);
    let signature = b64(&ctx.signer.sign(signed_input.as_bytes()).await?);
    let service_id = params.service_id.clone();
    let signed = SignedData {
        data: params.data,
        data_salt,
        signature: signature.clone(),
        reference_id: params.reference_id,
        callback_url: params.callback_url,
    };
    set_signed(&mut record, &service_id, Some(signed));
    ctx.store.put_as_request(&record)?;

    let submitted = ctx
        .ledger
        .transact(
            LedgerFunction::SignData,
            &SignDataArgs {
                request_id: request_id.clone(),
                service_id: service_id.clone(),
                signature,
            },
            Some(Continuation::DataSigned {
                request_id: request_id.clone(),
                service_id: service_id.clone(),
                rp_id: record.message.rp_id.clone(),
            }),
        )
        .await
        .at(stage, &request_id);
    if let Err(e) = submitted {
        set_signed(&mut record, &service_id, None);
        ctx.store.put_as_request(&record)?;
        return Err(e);
    }
    tracing::info!(target: "engine", request_id = %request_id, service_id = %service_id, "data signed");
    Ok(())
}

fn set_signed(record: &mut AsRequestRecord, service_id: &str, signed: Option<SignedData>) {
    if let Some(service) = record.service_mut(service_id) {
        service.signed = signed;
    }
}

/// `SignData` committed: hand the data to the RP and report.
pub(crate) async fn data_signed(
    ctx: &NodeContext,
    request_id: &RequestId,
    service_id: &str,
    rp_id: &NodeId,
    committed: &Committed,
) -> Result<(), EngineError> {
    let stage = "relaying data";
    let Some(mut record) = ctx.store.as_request(request_id)? else {
        return Ok(());
    };
    let Some(signed) = record.service(service_id).and_then(|s| s.signed.clone()) else {
        return Ok(());
    };

    let outcome = match committed.outcome(stage, request_id) {
        Ok(height) => {
            let message = PeerMessage::AsDataResponse(AsDataResponseMessage {
                request_id: request_id.clone(),
                service_id: service_id.to_string(),
                as_id: ctx.node_id().clone(),
                data: signed.data.clone(),
                data_salt: signed.data_salt.clone(),
                signature: signed.signature.clone(),
                height,
            });
            ctx.send_to(stage, rp_id, &message).await
        }
        Err(e) => {
            set_signed(&mut record, service_id, None);
            Err(e)
        }
    };
    if outcome.is_ok() {
        if let Some(service) = record.service_mut(service_id) {
            service.data_sent = true;
        }
    }
    ctx.store.put_as_request(&record)?;
    ctx.post(
        &signed.callback_url,
        CallbackBody::SendDataResult {
            reference_id: signed.reference_id.clone(),
            request_id: request_id.clone(),
            service_id: service_id.to_string(),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(callback_error),
        },
    )?;
    if outcome.is_ok() {
        tracing::info!(target: "engine", request_id = %request_id, service_id, "data relayed");
    }
    outcome
}

/// The AS client answered a `data_request` callback, possibly with the data.
pub(crate) async fn on_callback_reply(
    ctx: &NodeContext,
    handler: ResponseHandler,
    body: Value,
) -> Result<(), EngineError> {
    let ResponseHandler::AsServiceData {
        request_id,
        service_id,
    } = handler;
    let data = match body.get("data") {
        Some(Value::String(data)) => data.clone(),
        None | Some(Value::Null) => {
            tracing::debug!(target: "callback", request_id = %request_id, service_id = %service_id, "no inline data");
            return Ok(());
        }
        Some(other) => other.to_string(),
    };
    let callback_url = ctx
        .store
        .callback_urls()?
        .data_request_urls
        .get(&service_id)
        .cloned()
        .unwrap_or_default();
    let params = SendDataParams {
        reference_id: format!("{request_id}:{service_id}"),
        callback_url,
        request_id,
        service_id,
        data,
    };
    match process_data_request(ctx, params).await {
        Err(EngineError::Request(RequestError::DataAlreadySent { .. })) => Ok(()),
        other => other,
    }
}

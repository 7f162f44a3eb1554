// Path: crates/engine/tests/consent_flow_e2e.rs
//! RP, IdP and AS nodes running a request end to end over the fake ledger.

mod common;

use anyhow::{bail, Context, Result};
use common::*;
use ndid_api::callback::CallbackReply;
use ndid_api::storage::KvStore;
use ndid_engine::params::{
    CreateRequestParams, CreateResponseParams, SendDataParams, ServiceRequestParams,
};
use ndid_engine::EngineHandle;
use ndid_networking::PeerCodec;
use ndid_storage::{MemoryKvStore, OrchestrationStore};
use ndid_test_utils::fixtures::sign_b64;
use ndid_types::app::{
    DataRequestMessage, Identity, IdpProofBundle, Mode, NodeId, PeerMessage, RequestId,
    RequestStatus, ResponseStatus, ServiceDataRequest,
};
use ndid_types::config::WireConfig;
use ndid_types::error::ErrorCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_MESSAGE: &str = "Allow rp1 to read your bank statement?";

fn request_params(reference_id: &str, mode: Mode, with_service: bool) -> CreateRequestParams {
    let data_request_list = if with_service {
        vec![ServiceRequestParams {
            service_id: SERVICE.into(),
            as_id_list: vec![],
            min_as: 1,
            request_params: r#"{"format":"pdf"}"#.into(),
        }]
    } else {
        vec![]
    };
    CreateRequestParams {
        reference_id: reference_id.into(),
        callback_url: RP_CALLBACK.into(),
        mode,
        namespace: NAMESPACE.into(),
        identifier: IDENTIFIER.into(),
        idp_id_list: vec![NodeId::from("idp1")],
        data_request_list,
        request_message: REQUEST_MESSAGE.into(),
        min_ial: 2.3,
        min_aal: 3.0,
        min_idp: 1,
        request_timeout: Some(3_600),
    }
}

fn accept(request_id: &RequestId) -> CreateResponseParams {
    CreateResponseParams {
        reference_id: "idp-ref-1".into(),
        callback_url: IDP_RESULT.into(),
        request_id: request_id.clone(),
        status: ResponseStatus::Accept,
        ial: 2.3,
        aal: 3.0,
        accessor_id: None,
        signature: None,
        secret: None,
    }
}

/// An accepting mode-3 answer signed by `accessor1`.
fn accept_with_proof(request_id: &RequestId, request_message: &str) -> Result<CreateResponseParams> {
    let identity = Identity::new(NAMESPACE, IDENTIFIER);
    Ok(CreateResponseParams {
        accessor_id: Some("accessor1".into()),
        signature: Some(sign_b64("accessor1", request_message.as_bytes())?),
        secret: Some(sign_b64("accessor1", identity.canonical().as_bytes())?),
        ..accept(request_id)
    })
}

fn statuses_of(net: &Net, request_id: &RequestId) -> Vec<Value> {
    net.callbacks
        .bodies_of_type("request_status")
        .into_iter()
        .filter(|b| b["request_id"] == request_id.as_str())
        .collect()
}

async fn wait_closed(net: &Net, rp: &EngineHandle, request_id: &RequestId) -> bool {
    let ledger = &net.ledger;
    wait_for(|| async move {
        ledger.request(request_id).is_some_and(|d| d.closed) && rp.armed_timeouts() == 0
    })
    .await
}

async fn start_mode_three(net: &Net) -> Result<(EngineHandle, EngineHandle, EngineHandle)> {
    let rp = net.start("rp1").await?;
    let idp = net.start("idp1").await?;
    let as1 = net.start("as1").await?;
    idp.set_incoming_request_url(IDP_INCOMING)?;
    as1.set_data_request_url(SERVICE, AS_DATA_REQUEST)?;
    Ok((rp, idp, as1))
}

/// Waits for the `incoming_request` callback and returns its message.
async fn incoming_message(net: &Net) -> Result<String> {
    let callbacks = &net.callbacks;
    assert!(wait_for(|| async move { !callbacks.bodies_to(IDP_INCOMING).is_empty() }).await);
    let body = callbacks
        .bodies_to(IDP_INCOMING)
        .into_iter()
        .next()
        .context("no incoming request")?;
    Ok(body["request_message"]
        .as_str()
        .context("request_message missing")?
        .to_string())
}

/// The first payload of `kind` handed to the transport for `to`.
fn sent_message(net: &Net, codec: &PeerCodec, to: &NodeId, kind: &str) -> Option<Vec<u8>> {
    net.transport
        .sent()
        .into_iter()
        .filter(|(node, _)| node == to)
        .map(|(_, payload)| payload)
        .find(|payload| codec.decode(payload).is_ok_and(|m| m.kind() == kind))
}

async fn wait_for_sent(net: &Net, codec: &PeerCodec, to: &str, kind: &str) -> Result<Vec<u8>> {
    let to = NodeId::from(to);
    let (net_ref, to_ref) = (net, &to);
    wait_for(|| async move { sent_message(net_ref, codec, to_ref, kind).is_some() }).await;
    sent_message(net, codec, &to, kind).with_context(|| format!("no {kind} sent to {to}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mode_one_accept_completes_and_auto_closes() -> Result<()> {
    let net = Net::new(&["rp1", "idp1"])?;
    let rp = net.start("rp1").await?;
    let idp = net.start("idp1").await?;
    idp.set_incoming_request_url(IDP_INCOMING)?;

    let request_id = rp
        .create_request(request_params("ref-1", Mode::One, false))
        .await?;
    assert_eq!(rp.request_id_by_reference("ref-1")?, request_id);
    assert_eq!(
        rp.create_request(request_params("ref-1", Mode::One, false))
            .await?,
        request_id,
        "a reused reference id maps to the first request"
    );
    assert_eq!(
        rp.get_request_status(&request_id).await?.status,
        RequestStatus::Pending
    );

    assert_eq!(incoming_message(&net).await?, REQUEST_MESSAGE);
    idp.create_response(accept(&request_id)).await?;
    assert!(wait_closed(&net, &rp, &request_id).await);

    let detail = net.ledger.request(&request_id).context("request on ledger")?;
    assert_eq!(detail.responses.len(), 1);
    assert!(!detail.timed_out);
    assert_eq!(net.committed("CloseRequest"), 1);

    let report = rp.get_request_status(&request_id).await?;
    assert_eq!(report.status, RequestStatus::Completed);
    assert!(report.closed);
    assert_eq!(report.response_valid_list.len(), 1);
    assert!(report.response_valid_list.iter().all(|v| v.is_valid()));

    let callbacks = &net.callbacks;
    assert!(
        wait_for(|| async move {
            callbacks
                .bodies_of_type("close_request_result")
                .iter()
                .any(|b| b["success"] == true)
                && callbacks
                    .bodies_to(IDP_RESULT)
                    .iter()
                    .any(|b| b["success"] == true)
        })
        .await
    );
    let created: Vec<Value> = callbacks.bodies_of_type("create_request_result");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["success"], true);
    assert!(created[0]["creation_block_height"].as_u64().is_some());

    let statuses = statuses_of(&net, &request_id);
    assert!(statuses
        .iter()
        .any(|s| s["status"] == "completed" && s["closed"] == false));
    let net = &net;
    let rid = &request_id;
    assert!(
        wait_for(|| async move {
            statuses_of(net, rid).iter().any(|s| s["closed"] == true)
        })
        .await
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mode_three_completes_only_after_data_is_received() -> Result<()> {
    let net = Net::new(&["rp1", "idp1", "as1"])?;
    let (rp, idp, as1) = start_mode_three(&net).await?;

    let request_id = rp
        .create_request(request_params("ref-3", Mode::Three, true))
        .await?;
    let message = incoming_message(&net).await?;
    idp.create_response(accept_with_proof(&request_id, &message)?)
        .await?;

    let callbacks = &net.callbacks;
    assert!(
        wait_for(|| async move { !callbacks.bodies_of_type("data_request").is_empty() }).await,
        "the AS never saw the data request"
    );
    let data_request = callbacks
        .bodies_of_type("data_request")
        .into_iter()
        .next()
        .context("data request")?;
    assert_eq!(data_request["service_id"], SERVICE);
    assert_eq!(data_request["request_params"], r#"{"format":"pdf"}"#);
    assert_eq!(data_request["response_idp_id_list"], json!(["idp1"]));

    let report = rp.get_request_status(&request_id).await?;
    assert_eq!(report.status, RequestStatus::Confirmed);
    assert_eq!(report.response_valid_list.len(), 1);
    assert_eq!(report.response_valid_list[0].valid_proof, Some(true));

    as1.process_data_request(SendDataParams {
        reference_id: "as-ref-1".into(),
        callback_url: AS_RESULT.into(),
        request_id: request_id.clone(),
        service_id: SERVICE.into(),
        data: "statement:1000THB".into(),
    })
    .await?;
    assert!(wait_closed(&net, &rp, &request_id).await);

    let detail = net.ledger.request(&request_id).context("request on ledger")?;
    let service = &detail.data_request_list[0];
    assert_eq!(service.answered_as_id_list, vec![NodeId::from("as1")]);
    assert_eq!(service.received_data_from_list, vec![NodeId::from("as1")]);

    let statuses = statuses_of(&net, &request_id);
    assert!(statuses.iter().any(|s| s["status"] == "confirmed"));
    let completed: Vec<&Value> = statuses
        .iter()
        .filter(|s| s["status"] == "completed")
        .collect();
    assert!(!completed.is_empty());
    for status in completed {
        let service = &status["service_list"][0];
        assert_eq!(service["signed_data_count"], 1);
        assert_eq!(service["received_data_count"], 1);
    }

    let data = rp.get_data_from_as(&request_id)?;
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].data, "statement:1000THB");
    assert_eq!(data[0].as_id, NodeId::from("as1"));

    assert!(
        wait_for(|| async move {
            callbacks
                .bodies_to(AS_RESULT)
                .iter()
                .any(|b| b["type"] == "send_data_result" && b["success"] == true)
        })
        .await
    );
    assert!(as1
        .process_data_request(SendDataParams {
            reference_id: "as-ref-2".into(),
            callback_url: AS_RESULT.into(),
            request_id: request_id.clone(),
            service_id: SERVICE.into(),
            data: "again".into(),
        })
        .await
        .is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redelivered_messages_change_nothing() -> Result<()> {
    let net = Net::new(&["rp1", "idp1", "as1"])?;
    net.transport.set_duplicate(true);
    net.callbacks.script(
        AS_DATA_REQUEST,
        Ok(CallbackReply {
            status: 200,
            body: Some(json!({ "data": "statement:inline" })),
        }),
    );
    let (rp, idp, _as1) = start_mode_three(&net).await?;

    let request_id = rp
        .create_request(request_params("ref-dup", Mode::Three, true))
        .await?;
    let message = incoming_message(&net).await?;
    idp.create_response(accept_with_proof(&request_id, &message)?)
        .await?;
    assert!(wait_closed(&net, &rp, &request_id).await);

    // Let the second copies of every message play out.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let before = net.ledger.committed_functions();
    for function in [
        "CreateRequest",
        "DeclareIdentityProof",
        "CreateIdpResponse",
        "SignData",
        "SetDataReceived",
        "CloseRequest",
    ] {
        assert_eq!(net.committed(function), 1, "{function} committed more than once");
    }
    assert_eq!(net.callbacks.bodies_to(IDP_INCOMING).len(), 1);
    assert_eq!(net.callbacks.bodies_of_type("data_request").len(), 1);
    assert_eq!(rp.get_data_from_as(&request_id)?.len(), 1);

    let rp1 = NodeId::from("rp1");
    for (_, payload) in net.transport.sent().into_iter().filter(|(to, _)| to == &rp1) {
        assert!(rp.deliver(payload));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(net.ledger.committed_functions(), before);
    let detail = net.ledger.request(&request_id).context("request on ledger")?;
    assert_eq!(detail.responses.len(), 1);
    assert_eq!(rp.get_data_from_as(&request_id)?.len(), 1);
    assert_eq!(rp.armed_timeouts(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_response_from_the_same_idp_is_refused() -> Result<()> {
    // idp2 never answers, so the request stays open after idp1's response.
    let net = Net::new(&["rp1", "idp1", "idp2"])?;
    let rp = net.start("rp1").await?;
    let idp = net.start("idp1").await?;
    idp.set_incoming_request_url(IDP_INCOMING)?;

    let mut params = request_params("ref-twice", Mode::One, false);
    params.idp_id_list = vec![NodeId::from("idp1"), NodeId::from("idp2")];
    params.min_idp = 2;
    let request_id = rp.create_request(params).await?;
    incoming_message(&net).await?;

    idp.create_response(accept(&request_id)).await?;
    let err = idp
        .create_response(CreateResponseParams {
            status: ResponseStatus::Reject,
            ..accept(&request_id)
        })
        .await
        .expect_err("second response accepted");
    assert_eq!(err.code(), "REQ_DUPLICATE_RESPONSE");

    let (net, rid) = (&net, &request_id);
    assert!(
        wait_for(|| async move {
            statuses_of(net, rid)
                .iter()
                .any(|s| s["status"] == "confirmed")
        })
        .await
    );
    let detail = net.ledger.request(&request_id).context("request on ledger")?;
    assert_eq!(detail.responses.len(), 1);
    assert_eq!(detail.responses[0].status, ResponseStatus::Accept);
    assert!(!detail.closed);
    assert_eq!(
        rp.get_request_status(&request_id).await?.status,
        RequestStatus::Confirmed
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_data_receipt_is_submitted_again_on_redelivery() -> Result<()> {
    let net = Net::new(&["rp1", "idp1", "as1"])?;
    let (rp, idp, as1) = start_mode_three(&net).await?;

    let request_id = rp
        .create_request(request_params("ref-receipt", Mode::Three, true))
        .await?;
    let message = incoming_message(&net).await?;
    idp.create_response(accept_with_proof(&request_id, &message)?)
        .await?;
    let callbacks = &net.callbacks;
    assert!(wait_for(|| async move { !callbacks.bodies_of_type("data_request").is_empty() }).await);

    // From here on the RP only sees what the test hands it.
    net.transport.detach(&Net::address("rp1")?);
    as1.process_data_request(SendDataParams {
        reference_id: "as-ref-receipt".into(),
        callback_url: AS_RESULT.into(),
        request_id: request_id.clone(),
        service_id: SERVICE.into(),
        data: "statement:1000THB".into(),
    })
    .await?;
    let codec = PeerCodec::new(WireConfig::default());
    let data = wait_for_sent(&net, &codec, "rp1", "as_data_response").await?;
    assert_eq!(net.committed("SignData"), 1);

    net.ledger.reject_next_broadcasts(1);
    assert!(rp.deliver(data.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(net.committed("SetDataReceived"), 0);
    assert!(rp.get_data_from_as(&request_id)?.is_empty());
    assert_eq!(
        rp.get_request_status(&request_id).await?.status,
        RequestStatus::Confirmed
    );

    assert!(rp.deliver(data));
    assert!(wait_closed(&net, &rp, &request_id).await);
    assert_eq!(net.committed("SetDataReceived"), 1);
    assert_eq!(rp.get_data_from_as(&request_id)?.len(), 1);
    assert_eq!(
        rp.get_request_status(&request_id).await?.status,
        RequestStatus::Completed
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn response_with_a_broken_proof_counts_as_reject() -> Result<()> {
    let net = Net::new(&["rp1", "idp1", "as1"])?;
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let rp = net.start_on("rp1", Arc::clone(&kv)).await?;
    let idp = net.start("idp1").await?;
    let as1 = net.start("as1").await?;
    idp.set_incoming_request_url(IDP_INCOMING)?;
    as1.set_data_request_url(SERVICE, AS_DATA_REQUEST)?;

    let request_id = rp
        .create_request(request_params("ref-broken-proof", Mode::Three, true))
        .await?;
    let message = incoming_message(&net).await?;
    net.transport.detach(&Net::address("rp1")?);
    idp.create_response(accept_with_proof(&request_id, &message)?)
        .await?;

    let codec = PeerCodec::new(WireConfig::default());
    let challenge_request = wait_for_sent(&net, &codec, "rp1", "challenge_request").await?;
    assert!(rp.deliver(challenge_request));
    let response = wait_for_sent(&net, &codec, "rp1", "idp_response").await?;

    // Swapping the two rounds keeps every value well formed but wrong.
    let mut tampered = codec.decode(&response)?;
    let kind = tampered.kind();
    let PeerMessage::IdpResponse(idp_response) = &mut tampered else {
        bail!("expected an idp response, got {kind}");
    };
    let private_proof = idp_response
        .private_proof
        .as_mut()
        .context("mode 3 responses carry private proofs")?;
    private_proof.reverse();
    let private_proof = private_proof.clone();
    let padding = idp_response.padding.clone().context("padding")?;
    assert!(rp.deliver(codec.encode(&tampered)?));

    let (net_ref, rid) = (&net, &request_id);
    assert!(
        wait_for(|| async move {
            statuses_of(net_ref, rid)
                .iter()
                .any(|s| s["status"] == "rejected")
        })
        .await
    );
    let report = rp.get_request_status(&request_id).await?;
    assert_eq!(report.status, RequestStatus::Rejected);
    assert!(!report.closed);
    assert_eq!(report.response_valid_list.len(), 1);
    assert_eq!(report.response_valid_list[0].valid_signature, Some(true));
    assert_eq!(report.response_valid_list[0].valid_proof, Some(false));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(net.transport.sent_to(&NodeId::from("as1")), 0);
    assert!(net.callbacks.bodies_of_type("data_request").is_empty());
    assert_eq!(net.committed("CloseRequest"), 0);
    assert!(statuses_of(&net, &request_id)
        .iter()
        .all(|s| s["status"] != "completed"));

    // An AS handed the same proofs directly refuses to serve them.
    let store = OrchestrationStore::new(kv, NodeId::from("rp1"));
    let record = store.request(&request_id)?.context("rp record")?;
    let challenge = store
        .challenge(&request_id, &NodeId::from("idp1"))?
        .context("issued challenge")?;
    let data_request = PeerMessage::DataRequest(DataRequestMessage {
        request_id: request_id.clone(),
        mode: record.mode,
        namespace: record.identity.namespace.clone(),
        identifier: record.identity.identifier.clone(),
        request_message: record.request_message.clone(),
        request_message_salt: record.request_message_salt.clone(),
        service_data_request_list: record
            .data_request_list
            .iter()
            .map(|s| ServiceDataRequest {
                service_id: s.service_id.clone(),
                request_params: s.request_params.clone(),
                request_params_salt: s.request_params_salt.clone(),
            })
            .collect(),
        idp_proofs: vec![IdpProofBundle {
            idp_id: NodeId::from("idp1"),
            challenge,
            private_proof,
            padding,
        }],
        rp_id: NodeId::from("rp1"),
        creation_time: record.created_at_ms,
        height: net.ledger.height(),
    });
    assert!(as1.deliver(codec.encode(&data_request)?));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(net.callbacks.bodies_of_type("data_request").is_empty());
    assert_eq!(net.committed("SignData"), 0);
    Ok(())
}

// Path: crates/engine/src/dispatcher.rs
//! The single event loop of a node.

use crate::context::NodeContext;
use crate::{as_node, continuation, gate, idp, rp};
use ndid_types::app::{LedgerEvent, PeerMessage, RequestId, ResponseHandler, Role};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Work that reaches the dispatcher from inside the engine or from the transport.
#[derive(Debug)]
pub enum EngineEvent {
    /// An encoded peer message.
    Inbound(Vec<u8>),
    /// A request deadline passed.
    Timeout(RequestId),
    /// A client answered a callback with a body worth consuming.
    CallbackReply {
        handler: ResponseHandler,
        body: serde_json::Value,
    },
}

/// Runs until `shutdown` flips to true or its sender is dropped.
///
/// Block heights and commits are settled inline so the latest height and the
/// expected-transaction registry never lag behind the event order; everything
/// else is spawned and serialised per request by the request locks.
pub(crate) async fn run(
    ctx: Arc<NodeContext>,
    mut ledger_rx: broadcast::Receiver<LedgerEvent>,
    mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(target: "engine", node_id = %ctx.node_id(), role = %ctx.role(), "dispatcher started");
    let mut ledger_open = true;
    loop {
        tokio::select! {
            biased;

            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            event = ledger_rx.recv(), if ledger_open => match event {
                Ok(event) => on_ledger_event(&ctx, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "engine", skipped, "ledger subscription lagged, resyncing");
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move { resync(&ctx).await });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::error!(target: "engine", "ledger subscription closed");
                    ledger_open = false;
                }
            },

            Some(event) = events_rx.recv() => on_engine_event(&ctx, event),
        }
    }
    tracing::info!(target: "engine", node_id = %ctx.node_id(), "dispatcher stopped");
}

fn on_ledger_event(ctx: &Arc<NodeContext>, event: LedgerEvent) {
    match event {
        LedgerEvent::NewBlock {
            height,
            missing_block_count,
        } => {
            if let Err(e) = ctx.ledger.observe_height(height) {
                tracing::error!(target: "engine", height, error = %e, "could not record block height");
            }
            if missing_block_count > 0 {
                tracing::debug!(target: "engine", height, missing_block_count, "skipped blocks");
            }
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move { gate::drain(&ctx).await });
        }
        LedgerEvent::TxCommitted { tx_hash, result } => {
            match ctx.ledger.resolve_commit(&tx_hash, &result) {
                Ok(Some(expected)) => {
                    tokio::spawn(continuation::resume(Arc::clone(ctx), expected, result));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(target: "engine", tx_hash = %tx_hash, error = %e, "could not settle commit");
                }
            }
        }
    }
}

fn on_engine_event(ctx: &Arc<NodeContext>, event: EngineEvent) {
    let ctx = Arc::clone(ctx);
    match event {
        EngineEvent::Inbound(payload) => {
            tokio::spawn(async move { gate::accept(&ctx, payload).await });
        }
        EngineEvent::Timeout(request_id) => {
            tokio::spawn(async move {
                if let Err(e) = rp::on_timeout(&ctx, &request_id).await {
                    e.report("request timeout", &request_id);
                }
            });
        }
        EngineEvent::CallbackReply { handler, body } => {
            tokio::spawn(async move {
                let ResponseHandler::AsServiceData { request_id, .. } = &handler;
                let request_id = request_id.clone();
                if let Err(e) = as_node::on_callback_reply(&ctx, handler, body).await {
                    e.report("inline data", &request_id);
                }
            });
        }
    }
}

/// Catches up with the ledger: height, commits missed while away, parked messages.
pub(crate) async fn resync(ctx: &Arc<NodeContext>) {
    match ctx.ledger.sync_height().await {
        Ok(height) => tracing::debug!(target: "engine", height, "height synced"),
        Err(e) => tracing::warn!(target: "engine", error = %e, "could not read ledger height"),
    }
    match ctx.ledger.recover().await {
        Ok(settled) => {
            for (expected, result) in settled {
                tokio::spawn(continuation::resume(Arc::clone(ctx), expected, result));
            }
        }
        Err(e) => tracing::warn!(target: "engine", error = %e, "could not settle pending transactions"),
    }
    gate::drain(ctx).await;
}

/// Hands a message that passed the gate to the handler of this node's role.
pub(crate) async fn route(ctx: &NodeContext, message: PeerMessage) {
    let request_id = message.request_id().clone();
    let kind = message.kind();
    tracing::debug!(
        target: "engine",
        request_id = %request_id,
        kind,
        sender = %message.sender(),
        "handling peer message"
    );
    let outcome = match (ctx.role(), message) {
        (Role::Rp, PeerMessage::ChallengeRequest(m)) => rp::on_challenge_request(ctx, m).await,
        (Role::Rp, PeerMessage::IdpResponse(m)) => rp::on_idp_response(ctx, m).await,
        (Role::Rp, PeerMessage::AsDataResponse(m)) => rp::on_as_data(ctx, m).await,
        (Role::Idp, PeerMessage::ConsentRequest(m)) => idp::on_consent_request(ctx, m).await,
        (Role::Idp, PeerMessage::ChallengeResponse(m)) => idp::on_challenge_response(ctx, m).await,
        (Role::As, PeerMessage::DataRequest(m)) => as_node::on_data_request(ctx, m).await,
        (role, _) => {
            tracing::warn!(
                target: "engine",
                request_id = %request_id,
                kind,
                role = %role,
                "message not meant for this role, dropped"
            );
            Ok(())
        }
    };
    if let Err(e) = outcome {
        e.report(kind, &request_id);
    }
}

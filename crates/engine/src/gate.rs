// Path: crates/engine/src/gate.rs
//! The block-height gate in front of every peer message.
//!
//! A sender stamps each message with the height at which its ledger write
//! committed. The receiver must have seen that block before acting on the
//! message, otherwise its ledger reads may not include the write yet.

use crate::context::NodeContext;
use crate::dispatcher::route;
use crate::error::EngineError;
use ndid_crypto::algorithms::hash::sha256_hex;
use ndid_telemetry::{engine_metrics, error_metrics};
use ndid_types::app::RequestId;
use ndid_types::error::ErrorCode;

/// Processes a message now if its height is behind us, otherwise parks it.
///
/// A message at exactly the latest height is parked too and released at
/// once, so it goes through the same take-once path as a drained one.
pub(crate) async fn accept(ctx: &NodeContext, payload: Vec<u8>) {
    let message = match ctx.codec.decode(&payload) {
        Ok(message) => message,
        Err(e) => {
            error_metrics().inc_error("protocol_integrity", e.code());
            tracing::warn!(target: "gate", size = payload.len(), error = %e, "undecodable peer message dropped");
            return;
        }
    };
    let height = message.height();
    if ctx.ledger.latest_height() > height {
        route(ctx, message).await;
        return;
    }

    let request_id = message.request_id().clone();
    let digest = sha256_hex(&payload);
    let key = match ctx
        .store
        .buffer_message(height, &request_id, &digest, &payload)
    {
        Ok(Some(key)) => key,
        Ok(None) => {
            tracing::debug!(target: "gate", request_id = %request_id, height, "already parked");
            return;
        }
        Err(e) => {
            EngineError::from(e).report("parking message", &request_id);
            return;
        }
    };
    engine_metrics().inc_messages_buffered();
    tracing::debug!(
        target: "gate",
        request_id = %request_id,
        kind = message.kind(),
        height,
        latest = ctx.ledger.latest_height(),
        "parked until height"
    );

    // A block may have landed while we were parking it.
    if ctx.ledger.latest_height() >= height {
        take_and_process(ctx, &key, &request_id).await;
    }
}

/// Processes every parked message whose height has been reached.
pub(crate) async fn drain(ctx: &NodeContext) {
    let latest = ctx.ledger.latest_height();
    let entries = match ctx.store.buffered_up_to(latest) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(target: "gate", latest, error = %e, "could not scan parked messages");
            return;
        }
    };
    if entries.is_empty() {
        return;
    }
    tracing::debug!(target: "gate", latest, count = entries.len(), "draining");
    for entry in entries {
        take_and_process(ctx, &entry.key, &entry.request_id).await;
    }
}

/// Removes a parked message under the request lock and routes it if this
/// caller won the removal.
async fn take_and_process(ctx: &NodeContext, key: &[u8], request_id: &RequestId) {
    let taken = {
        let _guard = ctx.locks.lock(request_id).await;
        ctx.store.take_buffered(key)
    };
    let payload = match taken {
        Ok(Some(payload)) => payload,
        Ok(None) => return,
        Err(e) => {
            EngineError::from(e).report("releasing parked message", request_id);
            return;
        }
    };
    engine_metrics().inc_messages_drained();
    match ctx.codec.decode(&payload) {
        Ok(message) => route(ctx, message).await,
        Err(e) => {
            tracing::warn!(target: "gate", request_id = %request_id, error = %e, "parked message no longer decodes");
        }
    }
}

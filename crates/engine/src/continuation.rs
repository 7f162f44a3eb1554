// Path: crates/engine/src/continuation.rs
//! Resumes the step recorded with a transaction once it commits.

use crate::context::NodeContext;
use crate::error::EngineError;
use crate::{as_node, idp, rp};
use ndid_api::ledger::LedgerError;
use ndid_types::app::{Continuation, ExpectedTx, RequestId, TxHash, TxResult, CONTINUATION_VERSION};
use std::sync::Arc;

/// A committed transaction as seen by a continuation.
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub tx_hash: TxHash,
    pub result: TxResult,
}

impl Committed {
    /// The inclusion height, or the ledger's rejection as an error.
    pub(crate) fn outcome(
        &self,
        stage: &'static str,
        request_id: &RequestId,
    ) -> Result<u64, EngineError> {
        if self.result.success {
            return Ok(self.result.height);
        }
        Err(EngineError::Ledger {
            stage,
            request_id: Some(request_id.clone()),
            source: LedgerError::TxFailed {
                tx_hash: self.tx_hash.clone(),
                reason: self.result.error.clone().unwrap_or_default(),
            },
        })
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.result.success
    }
}

/// Runs the continuation of `expected` under its request lock.
pub(crate) async fn resume(ctx: Arc<NodeContext>, expected: ExpectedTx, result: TxResult) {
    let Some(envelope) = expected.continuation else {
        return;
    };
    if envelope.version != CONTINUATION_VERSION {
        tracing::warn!(
            target: "engine",
            tx_hash = %expected.tx_hash,
            version = envelope.version,
            "continuation written by an unknown layout, skipped"
        );
        return;
    }
    let continuation = envelope.continuation;
    let request_id = continuation.request_id().clone();
    let committed = Committed {
        tx_hash: expected.tx_hash,
        result,
    };
    tracing::debug!(
        target: "engine",
        request_id = %request_id,
        function = %expected.function,
        tx_hash = %committed.tx_hash,
        success = committed.result.success,
        "resuming"
    );

    let guard = ctx.locks.lock(&request_id).await;
    let outcome = match &continuation {
        Continuation::RequestCreated { request_id } => {
            rp::request_created(&ctx, request_id, &committed).await
        }
        Continuation::IdentityProofDeclared { request_id, rp_id } => {
            idp::identity_proof_declared(&ctx, request_id, rp_id, &committed).await
        }
        Continuation::IdpResponseCreated { request_id, rp_id } => {
            idp::response_created(&ctx, request_id, rp_id, &committed).await
        }
        Continuation::DataSigned {
            request_id,
            service_id,
            rp_id,
        } => as_node::data_signed(&ctx, request_id, service_id, rp_id, &committed).await,
        Continuation::DataReceivedRecorded {
            request_id,
            service_id,
            as_id,
        } => rp::data_received_recorded(&ctx, request_id, service_id, as_id, &committed).await,
        Continuation::RequestClosed { request_id } => {
            rp::request_closed(&ctx, request_id, &committed).await
        }
        Continuation::RequestTimedOut { request_id } => {
            rp::request_timed_out(&ctx, request_id, &committed).await
        }
    };
    drop(guard);

    if let Err(e) = outcome {
        e.report("resuming after commit", &request_id);
    }
    if matches!(
        continuation,
        Continuation::RequestClosed { .. } | Continuation::RequestTimedOut { .. }
    ) {
        ctx.locks.forget(&request_id);
    }
}

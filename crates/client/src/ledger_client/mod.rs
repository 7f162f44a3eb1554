// Path: crates/client/src/ledger_client/mod.rs

use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use ndid_api::crypto::NodeSigner;
use ndid_api::ledger::{LedgerBackend, LedgerError};
use ndid_api::storage::StorageError;
use ndid_api::time::Clock;
use ndid_storage::OrchestrationStore;
use ndid_telemetry::ledger_metrics;
use ndid_types::app::{
    Continuation, ExpectedTx, LedgerEvent, LedgerFunction, LedgerQuery, NodeId, TxHash, TxReceipt,
    TxResult,
};
use ndid_types::config::LedgerClientConfig;
use ndid_types::error::ErrorCode;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

pub mod payload;
mod queries;

/// Errors of a ledger call that also touches the local store.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for ClientError {
    fn code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.code(),
            Self::Storage(e) => e.code(),
        }
    }
}

/// The node's connection to the ledger.
pub struct LedgerClient {
    backend: Arc<dyn LedgerBackend>,
    signer: Arc<dyn NodeSigner>,
    store: OrchestrationStore,
    clock: Arc<dyn Clock>,
    cfg: LedgerClientConfig,
    latest: AtomicU64,
    waiters: DashMap<TxHash, oneshot::Sender<TxResult>>,
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("node_id", self.signer.node_id())
            .field("latest", &self.latest)
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

impl LedgerClient {
    /// Creates a client, resuming the latest height recorded in `store`.
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        signer: Arc<dyn NodeSigner>,
        store: OrchestrationStore,
        clock: Arc<dyn Clock>,
        cfg: LedgerClientConfig,
    ) -> Result<Self, StorageError> {
        let latest = store.latest_height()?;
        Ok(Self {
            backend,
            signer,
            store,
            clock,
            cfg,
            latest: AtomicU64::new(latest),
            waiters: DashMap::new(),
        })
    }

    /// The node this client signs for.
    pub fn node_id(&self) -> &NodeId {
        self.signer.node_id()
    }

    /// Subscribes to ledger events.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.backend.subscribe()
    }

    /// The highest block height this node has observed.
    pub fn latest_height(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    /// Raises the latest height. Lower heights are ignored.
    pub fn observe_height(&self, height: u64) -> Result<u64, StorageError> {
        let prev = self.latest.fetch_max(height, Ordering::AcqRel);
        if height > prev {
            self.store.advance_latest_height(height)?;
            ledger_metrics().set_latest_height(height);
        }
        Ok(prev.max(height))
    }

    /// Reads the backend's height and observes it.
    pub async fn sync_height(&self) -> Result<u64, ClientError> {
        let height = self.backend.latest_height().await?;
        Ok(self.observe_height(height)?)
    }

    /// Runs a query, retrying transient failures with capped exponential backoff.
    pub async fn query<A, R>(&self, query: LedgerQuery, args: &A) -> Result<Option<R>, LedgerError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| LedgerError::Decode(e.to_string()))?;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.cfg.query_min_delay_ms))
            .with_max_delay(Duration::from_millis(self.cfg.query_max_delay_ms))
            .with_max_times(self.cfg.query_retry_attempts.saturating_sub(1));

        let args = &args;
        let value = (|| async move { self.backend.query(query, args.clone()).await })
            .retry(backoff)
            .when(LedgerError::is_transient)
            .notify(|err: &LedgerError, delay: Duration| {
                ledger_metrics().inc_query_retries(query.as_str());
                tracing::warn!(
                    target: "ledger",
                    query = %query,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "retrying ledger query"
                );
            })
            .await?;

        value
            .map(|v| {
                serde_json::from_value(v).map_err(|e| LedgerError::Query {
                    query: query.as_str(),
                    reason: format!("undecodable result: {e}"),
                })
            })
            .transpose()
    }

    /// Submits a transaction. `continuation` runs once it commits.
    pub async fn transact<A: Serialize + ?Sized>(
        &self,
        function: LedgerFunction,
        args: &A,
        continuation: Option<Continuation>,
    ) -> Result<TxReceipt, ClientError> {
        let (receipt, _) = self.submit(function, args, continuation, false).await?;
        Ok(receipt)
    }

    /// Submits a transaction and blocks until it commits or the wait times out.
    ///
    /// Must not be called from the task that feeds ledger events back into
    /// [`LedgerClient::resolve_commit`].
    pub async fn transact_and_wait<A: Serialize + ?Sized>(
        &self,
        function: LedgerFunction,
        args: &A,
    ) -> Result<TxResult, ClientError> {
        let (receipt, waiter) = self.submit(function, args, None, true).await?;
        let Some(waiter) = waiter else {
            return Err(LedgerError::CommitTimeout(receipt.tx_hash).into());
        };
        let wait = Duration::from_millis(self.cfg.commit_wait_timeout_ms);
        match tokio::time::timeout(wait, waiter).await {
            Ok(Ok(result)) if result.success => Ok(result),
            Ok(Ok(result)) => Err(LedgerError::TxFailed {
                tx_hash: receipt.tx_hash,
                reason: result.error.unwrap_or_default(),
            }
            .into()),
            Ok(Err(_)) | Err(_) => {
                self.waiters.remove(&receipt.tx_hash);
                Err(LedgerError::CommitTimeout(receipt.tx_hash).into())
            }
        }
    }

    async fn submit<A: Serialize + ?Sized>(
        &self,
        function: LedgerFunction,
        args: &A,
        continuation: Option<Continuation>,
        wait_for_commit: bool,
    ) -> Result<(TxReceipt, Option<oneshot::Receiver<TxResult>>), ClientError> {
        let args = serde_json::to_value(args).map_err(|e| LedgerError::Decode(e.to_string()))?;
        let nonce = Uuid::new_v4().simple().to_string();
        let signed = payload::build(self.signer.as_ref(), function, &args, &nonce).await?;
        let tx_hash = signed.tx_hash.clone();

        let expected = ExpectedTx {
            tx_hash: tx_hash.clone(),
            function,
            wait_for_commit,
            continuation: continuation.map(|c| c.envelope()),
            submitted_at_ms: self.clock.now_ms(),
        };
        self.store.put_expected_tx(&expected)?;
        let waiter = wait_for_commit.then(|| {
            let (tx, rx) = oneshot::channel();
            self.waiters.insert(tx_hash.clone(), tx);
            rx
        });

        match self.backend.broadcast(signed.bytes).await {
            Ok(height) => {
                ledger_metrics().inc_tx_submitted(function.as_str());
                tracing::info!(
                    target: "ledger",
                    function = %function,
                    tx_hash = %tx_hash,
                    "transaction submitted"
                );
                Ok((TxReceipt { tx_hash, height }, waiter))
            }
            Err(e) => {
                ledger_metrics().inc_tx_failed(function.as_str());
                self.waiters.remove(&tx_hash);
                self.store.take_expected_tx(&tx_hash)?;
                tracing::warn!(
                    target: "ledger",
                    function = %function,
                    tx_hash = %tx_hash,
                    error = %e,
                    "broadcast failed"
                );
                Err(e.into())
            }
        }
    }

    /// Settles a committed transaction.
    ///
    /// Returns the expected-transaction record if this node submitted it and
    /// nobody settled it before. Wakes a caller blocked in
    /// [`LedgerClient::transact_and_wait`].
    pub fn resolve_commit(
        &self,
        tx_hash: &TxHash,
        result: &TxResult,
    ) -> Result<Option<ExpectedTx>, StorageError> {
        let expected = self.store.take_expected_tx(tx_hash)?;
        if let Some((_, waiter)) = self.waiters.remove(tx_hash) {
            let _ = waiter.send(result.clone());
        }
        if let Some(tx) = &expected {
            if result.success {
                tracing::debug!(
                    target: "ledger",
                    function = %tx.function,
                    tx_hash = %tx_hash,
                    height = result.height,
                    "transaction committed"
                );
            } else {
                ledger_metrics().inc_tx_failed(tx.function.as_str());
                tracing::warn!(
                    target: "ledger",
                    function = %tx.function,
                    tx_hash = %tx_hash,
                    error = ?result.error,
                    "transaction rejected by the ledger"
                );
            }
        }
        Ok(expected)
    }

    /// Settles every expected transaction the ledger already committed.
    ///
    /// Run once at start-up; transactions not yet committed stay expected and
    /// are settled by later events.
    pub async fn recover(&self) -> Result<Vec<(ExpectedTx, TxResult)>, ClientError> {
        let mut settled = Vec::new();
        for tx in self.store.expected_txs()? {
            match self.backend.tx_result(&tx.tx_hash).await {
                Ok(Some(result)) => {
                    if let Some(tx) = self.resolve_commit(&tx.tx_hash, &result)? {
                        settled.push((tx, result));
                    }
                }
                Ok(None) => {
                    tracing::debug!(target: "ledger", tx_hash = %tx.tx_hash, "transaction still pending");
                }
                Err(e) => {
                    tracing::warn!(
                        target: "ledger",
                        tx_hash = %tx.tx_hash,
                        error = %e,
                        "could not resolve transaction at start-up"
                    );
                }
            }
        }
        Ok(settled)
    }
}

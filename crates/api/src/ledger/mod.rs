// Path: crates/api/src/ledger/mod.rs

//! The contract of the permissioned ledger the engine reads and writes.
//!
//! Only transact, query and subscribe matter to the engine; consensus and
//! the ledger's own state machine live behind this trait.

use async_trait::async_trait;
use ndid_types::app::{LedgerEvent, LedgerQuery, TxHash, TxResult};
use ndid_types::error::ErrorCode;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors returned by a ledger backend or the client wrapping it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The backend could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// A query failed on the ledger side.
    #[error("query {query} failed: {reason}")]
    Query {
        /// The query name.
        query: &'static str,
        /// Backend-provided reason.
        reason: String,
    },
    /// The broadcast was refused before inclusion (e.g. check-tx failure).
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),
    /// The transaction was included but the ledger did not apply it.
    #[error("transaction {tx_hash} failed: {reason}")]
    TxFailed {
        /// The failed transaction.
        tx_hash: TxHash,
        /// Ledger-provided reason.
        reason: String,
    },
    /// A caller waiting for a commit gave up.
    #[error("timed out waiting for commit of {0}")]
    CommitTimeout(TxHash),
    /// A response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Signing the transaction payload failed.
    #[error("signing error: {0}")]
    Signing(String),
}

impl ErrorCode for LedgerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "LEDGER_UNAVAILABLE",
            Self::Query { .. } => "LEDGER_QUERY_FAILED",
            Self::BroadcastRejected(_) => "LEDGER_BROADCAST_REJECTED",
            Self::TxFailed { .. } => "LEDGER_TX_FAILED",
            Self::CommitTimeout(_) => "LEDGER_COMMIT_TIMEOUT",
            Self::Decode(_) => "LEDGER_DECODE_ERROR",
            Self::Signing(_) => "LEDGER_SIGNING_ERROR",
        }
    }
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::CommitTimeout(_))
    }
}

/// A connection to the ledger.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Runs a named read-only query. `Ok(None)` means the ledger has no such record.
    async fn query(
        &self,
        query: LedgerQuery,
        args: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, LedgerError>;

    /// Broadcasts a signed transaction payload.
    ///
    /// Returns the inclusion height when the backend already knows it.
    async fn broadcast(&self, payload: Vec<u8>) -> Result<Option<u64>, LedgerError>;

    /// Looks up the outcome of a transaction by hash, if it was committed.
    async fn tx_result(&self, tx_hash: &TxHash) -> Result<Option<TxResult>, LedgerError>;

    /// The latest committed height known to the backend.
    async fn latest_height(&self) -> Result<u64, LedgerError>;

    /// Subscribes to new-block and tx-commit events.
    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;
}

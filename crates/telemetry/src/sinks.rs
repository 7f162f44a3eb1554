// Path: crates/telemetry/src/sinks.rs
//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Installs the process-wide sink. Returns `false` if one was already installed.
pub fn install(sink: &'static dyn MetricsSink) -> bool {
    SINK.set(sink).is_ok()
}

/// Returns the configured engine metrics sink, or a no-op sink.
pub fn engine_metrics() -> &'static dyn EngineMetricsSink {
    match SINK.get().copied() {
        Some(sink) => sink.as_engine(),
        None => &NOP_SINK,
    }
}

/// Returns the configured ledger metrics sink, or a no-op sink.
pub fn ledger_metrics() -> &'static dyn LedgerMetricsSink {
    match SINK.get().copied() {
        Some(sink) => sink.as_ledger(),
        None => &NOP_SINK,
    }
}

/// Returns the configured storage metrics sink, or a no-op sink.
pub fn storage_metrics() -> &'static dyn StorageMetricsSink {
    match SINK.get().copied() {
        Some(sink) => sink.as_storage(),
        None => &NOP_SINK,
    }
}

/// Returns the configured error metrics sink, or a no-op sink.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    match SINK.get().copied() {
        Some(sink) => sink.as_error(),
        None => &NOP_SINK,
    }
}

// --- Trait Definitions ---

/// A sink for metrics related to the durable orchestration store.
pub trait StorageMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the total number of bytes written, labeled by table.
    fn inc_bytes_written(&self, table: &str, bytes: u64);
    /// Increments the number of failed store operations.
    fn inc_store_errors(&self);
}
impl StorageMetricsSink for NopSink {
    fn inc_bytes_written(&self, _table: &str, _bytes: u64) {}
    fn inc_store_errors(&self) {}
}

/// A sink for metrics related to the request orchestration engine.
pub trait EngineMetricsSink: Send + Sync + std::fmt::Debug {
    /// A request was created by this RP.
    fn inc_requests_created(&self);
    /// A response was judged, labeled by validity.
    fn inc_responses_judged(&self, valid: bool);
    /// A peer message was buffered by the block-height gate.
    fn inc_messages_buffered(&self);
    /// A buffered message was released by a new block.
    fn inc_messages_drained(&self);
    /// A request timeout fired.
    fn inc_timeouts_fired(&self);
    /// A callback was delivered, or permanently dropped.
    fn inc_callbacks(&self, delivered: bool);
    /// Observes the time spent verifying one zero-knowledge proof.
    fn observe_proof_verification(&self, duration_secs: f64);
}
impl EngineMetricsSink for NopSink {
    fn inc_requests_created(&self) {}
    fn inc_responses_judged(&self, _valid: bool) {}
    fn inc_messages_buffered(&self) {}
    fn inc_messages_drained(&self) {}
    fn inc_timeouts_fired(&self) {}
    fn inc_callbacks(&self, _delivered: bool) {}
    fn observe_proof_verification(&self, _duration_secs: f64) {}
}

/// A sink for metrics related to the ledger client.
pub trait LedgerMetricsSink: Send + Sync + std::fmt::Debug {
    /// A transaction was broadcast, labeled by function.
    fn inc_tx_submitted(&self, function: &str);
    /// A transaction failed to broadcast or apply, labeled by function.
    fn inc_tx_failed(&self, function: &str);
    /// A query was retried, labeled by query name.
    fn inc_query_retries(&self, query: &str);
    /// Sets the gauge of the latest observed block height.
    fn set_latest_height(&self, height: u64);
}
impl LedgerMetricsSink for NopSink {
    fn inc_tx_submitted(&self, _function: &str) {}
    fn inc_tx_failed(&self, _function: &str) {}
    fn inc_query_retries(&self, _query: &str) {}
    fn set_latest_height(&self, _height: u64) {}
}

/// A sink for counting errors by stable code.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the error counter for one error code.
    fn inc_error(&self, class: &'static str, code: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _class: &'static str, _code: &'static str) {}
}

/// A unified sink implementing every metrics trait.
pub trait MetricsSink:
    StorageMetricsSink + EngineMetricsSink + LedgerMetricsSink + ErrorMetricsSink
{
    /// This sink viewed as an engine sink.
    fn as_engine(&self) -> &dyn EngineMetricsSink;
    /// This sink viewed as a ledger sink.
    fn as_ledger(&self) -> &dyn LedgerMetricsSink;
    /// This sink viewed as a storage sink.
    fn as_storage(&self) -> &dyn StorageMetricsSink;
    /// This sink viewed as an error sink.
    fn as_error(&self) -> &dyn ErrorMetricsSink;
}

impl<T> MetricsSink for T
where
    T: StorageMetricsSink + EngineMetricsSink + LedgerMetricsSink + ErrorMetricsSink,
{
    fn as_engine(&self) -> &dyn EngineMetricsSink {
        self
    }
    fn as_ledger(&self) -> &dyn LedgerMetricsSink {
        self
    }
    fn as_storage(&self) -> &dyn StorageMetricsSink {
        self
    }
    fn as_error(&self) -> &dyn ErrorMetricsSink {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_sink_is_used_until_installed() {
        // Nothing is installed in unit tests, so every accessor falls back.
        engine_metrics().inc_requests_created();
        ledger_metrics().set_latest_height(5);
        storage_metrics().inc_store_errors();
        error_metrics().inc_error("client", "REQ_NOT_FOUND");
        assert!(SINK.get().is_none());
    }
}

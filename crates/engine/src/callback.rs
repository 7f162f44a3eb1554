// Path: crates/engine/src/callback.rs
//! The persisted at-least-once queue of client callbacks.

use crate::dispatcher::EngineEvent;
use backon::{ExponentialBuilder, Retryable};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ndid_api::callback::{CallbackReply, CallbackSender};
use ndid_api::storage::StorageError;
use ndid_api::time::Clock;
use ndid_client::LedgerClient;
use ndid_storage::OrchestrationStore;
use ndid_telemetry::engine_metrics;
use ndid_types::app::{CallbackBody, CallbackEntry, ResponseHandler, RetryProbe};
use ndid_types::config::CallbackConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Why one delivery attempt did not succeed.
#[derive(Debug)]
enum Attempt {
    /// Worth another try.
    Retry(String),
    /// The retry probe says the callback is moot.
    Stopped,
    /// The total delivery window has passed.
    GaveUp,
}

impl Attempt {
    fn is_retry(&self) -> bool {
        matches!(self, Attempt::Retry(_))
    }
}

struct Inner {
    store: OrchestrationStore,
    sender: Arc<dyn CallbackSender>,
    ledger: Arc<LedgerClient>,
    clock: Arc<dyn Clock>,
    cfg: CallbackConfig,
    in_flight: DashMap<String, JoinHandle<()>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

/// Delivers callbacks with capped exponential backoff until the client
/// answers 2xx, the retry probe stops it or the delivery window closes.
///
/// Entries are persisted before the first attempt and resumed at start-up.
/// At most one delivery task runs per callback id.
#[derive(Clone)]
pub struct CallbackQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("in_flight", &self.inner.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl CallbackQueue {
    pub fn new(
        store: OrchestrationStore,
        sender: Arc<dyn CallbackSender>,
        ledger: Arc<LedgerClient>,
        clock: Arc<dyn Clock>,
        cfg: CallbackConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sender,
                ledger,
                clock,
                cfg,
                in_flight: DashMap::new(),
                events,
            }),
        }
    }

    /// Persists a callback and starts delivering it. Returns its id.
    pub fn enqueue(
        &self,
        url: &str,
        body: CallbackBody,
        retry_probe: Option<RetryProbe>,
        response_handler: Option<ResponseHandler>,
    ) -> Result<String, StorageError> {
        let now = self.inner.clock.now_ms();
        let entry = CallbackEntry {
            callback_id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            body,
            retry_probe,
            response_handler,
            created_at_ms: now,
            give_up_at_ms: now.saturating_add(self.inner.cfg.total_timeout_ms),
            attempts: 0,
        };
        self.inner.store.put_callback(&entry)?;
        tracing::debug!(
            target: "callback",
            callback_id = %entry.callback_id,
            kind = entry.body.kind(),
            request_id = %entry.body.request_id(),
            "queued"
        );
        let callback_id = entry.callback_id.clone();
        self.spawn(entry);
        Ok(callback_id)
    }

    /// Restarts delivery of every persisted callback.
    pub fn resume_all(&self) -> Result<usize, StorageError> {
        let pending = self.inner.store.callbacks()?;
        let count = pending.len();
        for entry in pending {
            self.spawn(entry);
        }
        if count > 0 {
            tracing::info!(target: "callback", count, "resumed queued callbacks");
        }
        Ok(count)
    }

    /// Callbacks currently being delivered.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Aborts every delivery task. Entries stay persisted.
    pub fn shutdown(&self) {
        self.inner.in_flight.retain(|_, task| {
            task.abort();
            false
        });
    }

    fn spawn(&self, entry: CallbackEntry) {
        match self.inner.in_flight.entry(entry.callback_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(target: "callback", callback_id = %entry.callback_id, "already in flight");
            }
            Entry::Vacant(slot) => {
                let inner = Arc::clone(&self.inner);
                slot.insert(tokio::spawn(async move { inner.deliver(entry).await }));
            }
        }
    }
}

impl Inner {
    fn backoff(&self) -> ExponentialBuilder {
        let max_times = self
            .cfg
            .total_timeout_ms
            .checked_div(self.cfg.min_delay_ms)
            .unwrap_or(0)
            .saturating_add(1);
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.cfg.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.cfg.max_delay_ms))
            .with_factor(self.cfg.factor)
            .with_max_times(usize::try_from(max_times).unwrap_or(usize::MAX));
        if self.cfg.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    async fn attempt(
        &self,
        entry: &CallbackEntry,
        body: &serde_json::Value,
        attempts: &AtomicU32,
    ) -> Result<CallbackReply, Attempt> {
        if self.clock.now_ms() >= entry.give_up_at_ms {
            return Err(Attempt::GaveUp);
        }
        if let Some(RetryProbe::RequestOpen { request_id }) = &entry.retry_probe {
            match self.ledger.request_detail(request_id).await {
                Ok(Some(detail)) if detail.is_finished() => return Err(Attempt::Stopped),
                Ok(None) => return Err(Attempt::Stopped),
                Ok(Some(_)) => {}
                // An unreachable ledger is no reason to hold the callback back.
                Err(e) => {
                    tracing::debug!(target: "callback", request_id = %request_id, error = %e, "retry probe failed");
                }
            }
        }

        let attempt = attempts.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let mut progress = entry.clone();
        progress.attempts = attempt;
        if let Err(e) = self.store.put_callback(&progress) {
            tracing::warn!(target: "callback", callback_id = %entry.callback_id, error = %e, "could not persist attempt count");
        }

        let timeout = Duration::from_millis(self.cfg.attempt_timeout_ms);
        match tokio::time::timeout(timeout, self.sender.post(&entry.url, body)).await {
            Ok(Ok(reply)) if reply.is_success() => Ok(reply),
            Ok(Ok(reply)) => Err(Attempt::Retry(format!("HTTP status {}", reply.status))),
            Ok(Err(e)) => Err(Attempt::Retry(e.to_string())),
            Err(_) => Err(Attempt::Retry("attempt timed out".into())),
        }
    }

    async fn deliver(self: Arc<Self>, entry: CallbackEntry) {
        let callback_id = entry.callback_id.clone();
        let kind = entry.body.kind();
        let request_id = entry.body.request_id().clone();
        let attempts = AtomicU32::new(entry.attempts);

        let outcome = match serde_json::to_value(&entry.body) {
            Ok(body) => {
                let (this, entry, body, attempts) = (&*self, &entry, &body, &attempts);
                (|| async move { this.attempt(entry, body, attempts).await })
                    .retry(self.backoff())
                    .when(Attempt::is_retry)
                    .notify(|err: &Attempt, delay: Duration| {
                        tracing::debug!(
                            target: "callback",
                            callback_id = %callback_id,
                            error = ?err,
                            retry_in_ms = delay.as_millis() as u64,
                            "callback attempt failed"
                        );
                    })
                    .await
            }
            Err(e) => {
                tracing::error!(target: "callback", callback_id = %callback_id, error = %e, "unencodable callback body");
                Err(Attempt::GaveUp)
            }
        };

        if let Err(e) = self.store.remove_callback(&callback_id) {
            tracing::error!(target: "callback", callback_id = %callback_id, error = %e, "could not drop finished callback");
        }
        self.in_flight.remove(&callback_id);

        match outcome {
            Ok(reply) => {
                engine_metrics().inc_callbacks(true);
                tracing::info!(
                    target: "callback",
                    callback_id = %callback_id,
                    kind,
                    request_id = %request_id,
                    status = reply.status,
                    attempts = attempts.load(Ordering::Acquire),
                    "callback delivered"
                );
                if let (Some(handler), Some(body)) = (entry.response_handler, reply.body) {
                    let _ = self.events.send(EngineEvent::CallbackReply { handler, body });
                }
            }
            Err(Attempt::Stopped) => {
                tracing::info!(
                    target: "callback",
                    callback_id = %callback_id,
                    kind,
                    request_id = %request_id,
                    "request finished, callback dropped"
                );
            }
            Err(err) => {
                engine_metrics().inc_callbacks(false);
                tracing::warn!(
                    target: "callback",
                    callback_id = %callback_id,
                    kind,
                    request_id = %request_id,
                    url = %entry.url,
                    attempts = attempts.load(Ordering::Acquire),
                    error = ?err,
                    "giving up on callback"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_storage::MemoryKvStore;
    use ndid_test_utils::assertions::eventually;
    use ndid_test_utils::{fixtures, FakeLedger, ManualClock, RecordingCallbackSender};
    use ndid_types::app::{NodeId, RequestId};
    use ndid_types::config::LedgerClientConfig;
    use serde_json::json;

    const URL: &str = "http://rp1.local/callback";

    struct Harness {
        queue: CallbackQueue,
        store: OrchestrationStore,
        sender: Arc<RecordingCallbackSender>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    }

    fn harness(clock: Arc<ManualClock>, total_timeout_ms: u64) -> Harness {
        let store = OrchestrationStore::new(Arc::new(MemoryKvStore::new()), NodeId::from("rp1"));
        let ledger = Arc::new(
            LedgerClient::new(
                Arc::new(FakeLedger::new()),
                fixtures::signer("rp1").unwrap(),
                store.clone(),
                clock.clone(),
                LedgerClientConfig {
                    query_retry_attempts: 1,
                    ..LedgerClientConfig::default()
                },
            )
            .unwrap(),
        );
        let sender = Arc::new(RecordingCallbackSender::new());
        let (tx, events) = mpsc::unbounded_channel();
        let cfg = CallbackConfig {
            min_delay_ms: 10,
            max_delay_ms: 40,
            factor: 2.0,
            jitter: false,
            total_timeout_ms,
            attempt_timeout_ms: 1_000,
        };
        let queue = CallbackQueue::new(store.clone(), sender.clone(), ledger, clock, cfg, tx);
        Harness {
            queue,
            store,
            sender,
            events,
        }
    }

    fn close_result(request_id: &str) -> CallbackBody {
        CallbackBody::CloseRequestResult {
            reference_id: "ref-1".into(),
            request_id: RequestId::from(request_id),
            success: true,
            error: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_are_retried_until_delivered() {
        let h = harness(Arc::new(ManualClock::new(1_000)), 60_000);
        h.sender.fail_next(URL, 2);

        let id = h.queue.enqueue(URL, close_result("r1"), None, None).unwrap();
        let queue = &h.queue;
        let done = eventually(100, Duration::from_millis(10), || async move {
            queue.in_flight() == 0
        })
        .await;

        assert!(done);
        assert_eq!(h.sender.bodies_to(URL).len(), 3);
        assert!(h.store.callback(&id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_or_unknown_request_stops_retrying() {
        let h = harness(Arc::new(ManualClock::new(1_000)), 60_000);

        let probe = RetryProbe::RequestOpen {
            request_id: RequestId::from("unknown"),
        };
        let id = h
            .queue
            .enqueue(URL, close_result("unknown"), Some(probe), None)
            .unwrap();
        let queue = &h.queue;
        let done = eventually(100, Duration::from_millis(10), || async move {
            queue.in_flight() == 0
        })
        .await;

        assert!(done);
        assert!(h.sender.posts().is_empty());
        assert!(h.store.callback(&id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_on_resume() {
        let clock = Arc::new(ManualClock::new(10_000));
        let h = harness(clock, 60_000);
        let entry = CallbackEntry {
            callback_id: "cb-1".into(),
            url: URL.into(),
            body: close_result("r1"),
            retry_probe: None,
            response_handler: None,
            created_at_ms: 1_000,
            give_up_at_ms: 5_000,
            attempts: 3,
        };
        h.store.put_callback(&entry).unwrap();

        assert_eq!(h.queue.resume_all().unwrap(), 1);
        let queue = &h.queue;
        let done = eventually(100, Duration::from_millis(10), || async move {
            queue.in_flight() == 0
        })
        .await;

        assert!(done);
        assert!(h.sender.posts().is_empty());
        assert!(h.store.callbacks().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_body_goes_to_its_handler() {
        let mut h = harness(Arc::new(ManualClock::new(1_000)), 60_000);
        h.sender.script(
            URL,
            Ok(CallbackReply {
                status: 200,
                body: Some(json!({ "data": "statement" })),
            }),
        );
        let handler = ResponseHandler::AsServiceData {
            request_id: RequestId::from("r1"),
            service_id: "bank_statement".into(),
        };

        h.queue
            .enqueue(URL, close_result("r1"), None, Some(handler.clone()))
            .unwrap();

        match h.events.recv().await {
            Some(EngineEvent::CallbackReply { handler: got, body }) => {
                assert_eq!(got, handler);
                assert_eq!(body["data"], "statement");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

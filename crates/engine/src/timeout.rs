// Path: crates/engine/src/timeout.rs
//! Request deadlines.

use crate::dispatcher::EngineEvent;
use dashmap::DashMap;
use ndid_api::storage::StorageError;
use ndid_api::time::Clock;
use ndid_storage::OrchestrationStore;
use ndid_types::app::RequestId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One timer per open request, backed by a persisted absolute deadline.
///
/// A timer only posts [`EngineEvent::Timeout`]; the handler re-checks the
/// persisted entry under the request lock, so a disarm racing an already
/// fired timer is harmless.
pub struct TimeoutScheduler {
    store: OrchestrationStore,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<EngineEvent>,
    timers: DashMap<RequestId, JoinHandle<()>>,
}

impl std::fmt::Debug for TimeoutScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutScheduler")
            .field("armed", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl TimeoutScheduler {
    pub fn new(
        store: OrchestrationStore,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            timers: DashMap::new(),
        }
    }

    /// Persists `deadline_ms` and starts the timer.
    pub fn arm(&self, request_id: &RequestId, deadline_ms: u64) -> Result<(), StorageError> {
        self.store.put_timeout(request_id, deadline_ms)?;
        self.schedule(request_id, deadline_ms);
        tracing::debug!(target: "timeout", request_id = %request_id, deadline_ms, "armed");
        Ok(())
    }

    /// Stops the timer and forgets the deadline. Returns whether one was persisted.
    pub fn disarm(&self, request_id: &RequestId) -> Result<bool, StorageError> {
        if let Some((_, timer)) = self.timers.remove(request_id) {
            timer.abort();
        }
        let removed = self.store.remove_timeout(request_id)?;
        if removed {
            tracing::debug!(target: "timeout", request_id = %request_id, "disarmed");
        }
        Ok(removed)
    }

    /// Restarts a timer for every persisted deadline. Past deadlines fire at once.
    pub fn rearm_all(&self) -> Result<usize, StorageError> {
        let deadlines = self.store.timeouts()?;
        for (request_id, deadline_ms) in &deadlines {
            self.schedule(request_id, *deadline_ms);
        }
        if !deadlines.is_empty() {
            tracing::info!(target: "timeout", count = deadlines.len(), "re-armed persisted deadlines");
        }
        Ok(deadlines.len())
    }

    /// Fires again after `delay` without touching the persisted deadline.
    pub fn retry_after(&self, request_id: &RequestId, delay: Duration) {
        let deadline = self
            .clock
            .now_ms()
            .saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self.schedule(request_id, deadline);
    }

    /// Drops the handle of a timer that has fired.
    pub(crate) fn fired(&self, request_id: &RequestId) {
        self.timers.remove(request_id);
    }

    /// Number of running timers.
    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    /// Aborts every running timer. Persisted deadlines stay.
    pub fn shutdown(&self) {
        self.timers.retain(|_, timer| {
            timer.abort();
            false
        });
    }

    fn schedule(&self, request_id: &RequestId, deadline_ms: u64) {
        let remaining = deadline_ms.saturating_sub(self.clock.now_ms());
        let events = self.events.clone();
        let rid = request_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(remaining)).await;
            let _ = events.send(EngineEvent::Timeout(rid));
        });
        if let Some(previous) = self.timers.insert(request_id.clone(), timer) {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_storage::MemoryKvStore;
    use ndid_test_utils::ManualClock;
    use ndid_types::app::NodeId;
    use tokio::time::Instant;

    fn store() -> OrchestrationStore {
        OrchestrationStore::new(Arc::new(MemoryKvStore::new()), NodeId::from("rp1"))
    }

    #[tokio::test(start_paused = true)]
    async fn restart_fires_once_at_the_original_deadline() {
        let store = store();
        let clock = Arc::new(ManualClock::new(0));
        let rid = RequestId::from("r1");

        let (tx, _rx) = mpsc::unbounded_channel();
        let before = TimeoutScheduler::new(store.clone(), clock.clone(), tx);
        before.arm(&rid, 5_000).unwrap();
        before.shutdown();

        // Restart three seconds in.
        clock.set(3_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let after = TimeoutScheduler::new(store.clone(), clock.clone(), tx);
        assert_eq!(after.rearm_all().unwrap(), 1);

        let started = Instant::now();
        match rx.recv().await {
            Some(EngineEvent::Timeout(fired)) => assert_eq!(fired, rid),
            other => panic!("unexpected event {other:?}"),
        }
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(2_000), "fired early: {waited:?}");
        assert!(waited < Duration::from_millis(2_100), "fired late: {waited:?}");

        let again = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(again.is_err(), "timer fired twice");
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_stops_the_timer_and_the_entry() {
        let store = store();
        let clock = Arc::new(ManualClock::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TimeoutScheduler::new(store.clone(), clock, tx);
        let rid = RequestId::from("r1");

        scheduler.arm(&rid, 1_000).unwrap();
        assert!(scheduler.disarm(&rid).unwrap());
        assert!(!scheduler.disarm(&rid).unwrap());
        assert!(!store.has_timeout(&rid).unwrap());

        let fired = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadlines_fire_immediately() {
        let store = store();
        store.put_timeout(&RequestId::from("late"), 1_000).unwrap();
        let clock = Arc::new(ManualClock::new(9_000));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TimeoutScheduler::new(store, clock, tx);
        scheduler.rearm_all().unwrap();

        let started = Instant::now();
        assert!(matches!(rx.recv().await, Some(EngineEvent::Timeout(_))));
        assert!(started.elapsed() < Duration::from_millis(10));
    }
}

// Path: crates/engine/src/lock.rs
//! Per-request serialisation.

use dashmap::DashMap;
use ndid_types::app::{NodeId, RequestId};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per `(node, request)`.
///
/// Message, block, continuation, timer and API driven work on the same
/// request all go through it. Different requests never contend.
#[derive(Debug)]
pub struct RequestLocks {
    node_id: NodeId,
    locks: DashMap<(NodeId, RequestId), Arc<Mutex<()>>>,
}

impl RequestLocks {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            locks: DashMap::new(),
        }
    }

    /// Waits for exclusive access to `request_id`.
    pub async fn lock(&self, request_id: &RequestId) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry((self.node_id.clone(), request_id.clone()))
            .or_default()
            .clone();
        mutex.lock_owned().await
    }

    /// Drops the mutex of a finished request unless someone still holds or awaits it.
    pub fn forget(&self, request_id: &RequestId) {
        self.locks
            .remove_if(&(self.node_id.clone(), request_id.clone()), |_, m| {
                Arc::strong_count(m) == 1
            });
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_request_is_serialised() {
        let locks = Arc::new(RequestLocks::new(NodeId::from("rp1")));
        let rid = RequestId::from("r1");
        let guard = locks.lock(&rid).await;

        let contender = {
            let locks = locks.clone();
            let rid = rid.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&rid).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different request is not blocked.
        let _other = locks.lock(&RequestId::from("r2")).await;
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn forget_keeps_contended_locks() {
        let locks = RequestLocks::new(NodeId::from("rp1"));
        let rid = RequestId::from("r1");
        let guard = locks.lock(&rid).await;
        locks.forget(&rid);
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget(&rid);
        assert!(locks.is_empty());
    }
}

// Path: crates/test_utils/src/assertions/mod.rs
//! Waiting on conditions that settle asynchronously.

use std::future::Future;
use std::time::Duration;

/// Polls `check` every `step` until it holds or `attempts` run out.
///
/// Returns whether the condition was met. Under a paused tokio clock the
/// sleeps advance virtual time.
pub async fn eventually<F, Fut>(attempts: usize, step: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..attempts {
        if check().await {
            return true;
        }
        tokio::time::sleep(step).await;
    }
    check().await
}

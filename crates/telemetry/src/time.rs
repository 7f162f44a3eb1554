// Path: crates/telemetry/src/time.rs
use crate::sinks::EngineMetricsSink;
use std::time::Instant;

/// Reports the lifetime of a proof verification to the engine sink on drop.
pub struct ProofTimer<'a> {
    sink: &'a dyn EngineMetricsSink,
    start: Instant,
}

impl<'a> ProofTimer<'a> {
    /// Starts timing.
    pub fn new(sink: &'a dyn EngineMetricsSink) -> Self {
        Self {
            sink,
            start: Instant::now(),
        }
    }
}

impl Drop for ProofTimer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_proof_verification(self.start.elapsed().as_secs_f64());
    }
}

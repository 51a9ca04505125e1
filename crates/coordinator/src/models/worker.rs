use std::time::Duration;

/// Identity of one logical worker (bot) sharing the coordinator.
///
/// Worker ids are 1-based; worker 1 starts immediately and worker `n` waits
/// `(n - 1) * base_stagger` before its first request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WorkerIdentity {
    pub id: u32,
}

impl WorkerIdentity {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    /// One-time startup offset for this worker.
    pub fn stagger_offset(&self, base_stagger: Duration) -> Duration {
        base_stagger.saturating_mul(self.id.saturating_sub(1))
    }
}

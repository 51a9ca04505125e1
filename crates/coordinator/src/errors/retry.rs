/// Classification of an operation failure.
///
/// Used by the retry policy to decide how the scheduler responds to a failed attempt.
///
/// # Behavior Summary
///
/// | Class | Requeue? | Record Circuit Breaker Failure? | Provider effect |
/// |-------|----------|--------------------------------|-----------------|
/// | `RateLimited` | Yes, after a forced cooldown | Yes | Cooled down for a fixed window |
/// | `Transient` | Yes, with exponential backoff and jitter | Yes | Counts toward connection-failure cooldown |
/// | `Fatal` | No | No | None |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// The provider throttled the request (HTTP 429, quota exceeded, RPC limit codes).
    ///
    /// The serving provider is taken out of rotation for a cooldown window and the
    /// request waits at least the rate-limit cooldown before it is tried again.
    RateLimited,

    /// Timeout, connection failure or server-side error.
    /// Worth retrying with backoff; repeated occurrences open the circuit.
    Transient,

    /// Malformed request, authorization failure or another caller bug.
    /// Retrying won't help and the source's health is not affected.
    Fatal,
}

impl FailureClass {
    /// Whether this class counts against the source's circuit breaker.
    pub fn affects_circuit(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

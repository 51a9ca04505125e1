//! Per-source circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to stop dispatching to a source
//! that keeps failing. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Source is failing, requests fail fast without being invoked.
//! - **HalfOpen**: Testing recovery, exactly one trial request is in flight.
//!
//! The circuit breaker is in-memory and resets on application restart.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::Source;

/// Default number of failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Source is failing - requests are blocked.
    Open,
    /// Testing recovery - a single trial request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Outcome of asking the breaker whether a dispatch may proceed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// Circuit is closed; dispatch normally.
    Closed,
    /// Circuit is half-open and this dispatch is the single trial request.
    /// The caller must settle it with `record_success`, `record_failure`
    /// or `release_trial`.
    Trial,
    /// A trial is already in flight; wait for it to settle.
    TrialPending,
    /// Circuit is open; fail fast.
    Rejected { retry_after: Duration },
}

/// Internal circuit state.
#[derive(Debug)]
struct Circuit {
    /// Current circuit state.
    state: CircuitState,
    /// Number of consecutive failures.
    failure_count: u32,
    /// When the circuit last opened.
    opened_at: Option<Instant>,
    /// Whether the HalfOpen trial request is in flight.
    trial_in_flight: bool,
    /// Set when a HalfOpen trial failed, until the circuit closes again.
    reopened_from_trial: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            trial_in_flight: false,
            reopened_from_trial: false,
        }
    }

    fn remaining_open(&self, timeout: Duration) -> Duration {
        self.opened_at
            .map(|opened| timeout.saturating_sub(opened.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before testing recovery.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Circuit breaker owned by a single source.
///
/// Thread-safe; all transitions happen under one short-held mutex. The state is
/// in-memory and resets when the application restarts.
pub struct CircuitBreaker {
    source: Source,
    circuit: Mutex<Circuit>,
    config: CircuitBreakerConfig,
    /// Signalled whenever a HalfOpen trial settles.
    trial_settled: Notify,
}

impl CircuitBreaker {
    /// Create a circuit breaker with default settings.
    pub fn new(source: Source) -> Self {
        Self::with_config(source, CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(source: Source, config: CircuitBreakerConfig) -> Self {
        Self {
            source,
            circuit: Mutex::new(Circuit::new()),
            config,
            trial_settled: Notify::new(),
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly stale circuit state,
    /// which is better than panicking inside the scheduler.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex for '{}' was poisoned, recovering", self.source);
            poisoned.into_inner()
        })
    }

    /// Open -> HalfOpen once the recovery timeout has elapsed.
    fn refresh(&self, circuit: &mut Circuit) {
        if circuit.state == CircuitState::Open
            && circuit.remaining_open(self.config.recovery_timeout) == Duration::ZERO
        {
            info!(
                "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                self.source
            );
            circuit.state = CircuitState::HalfOpen;
            circuit.trial_in_flight = false;
        }
    }

    /// Fast-path check used before a request is queued.
    ///
    /// Returns the time left until a trial is admitted when the circuit is open.
    pub fn check(&self) -> Result<(), Duration> {
        let mut circuit = self.lock_circuit();
        self.refresh(&mut circuit);

        match circuit.state {
            CircuitState::Open => Err(circuit.remaining_open(self.config.recovery_timeout)),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    /// Decide whether a dispatch may proceed.
    ///
    /// Handles Open -> HalfOpen when the recovery timeout has elapsed and hands
    /// out the single HalfOpen trial.
    pub fn admit(&self) -> Admission {
        let mut circuit = self.lock_circuit();
        self.refresh(&mut circuit);

        match circuit.state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open => Admission::Rejected {
                retry_after: circuit.remaining_open(self.config.recovery_timeout),
            },
            CircuitState::HalfOpen if circuit.trial_in_flight => Admission::TrialPending,
            CircuitState::HalfOpen => {
                debug!("Circuit breaker: admitting trial request for '{}'", self.source);
                circuit.trial_in_flight = true;
                Admission::Trial
            }
        }
    }

    /// Wait until the in-flight trial settles.
    pub async fn trial_settled(&self) {
        self.trial_settled.notified().await;
    }

    /// Record a successful request.
    ///
    /// In Closed state: resets failure count.
    /// In HalfOpen state: closes the circuit when `trial` is the admitted trial.
    /// Outcomes of requests dispatched before the circuit opened never settle
    /// the trial.
    pub fn record_success(&self, trial: bool) {
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
                debug!(
                    "Circuit breaker: success for '{}', failure count reset",
                    self.source
                );
            }
            CircuitState::HalfOpen if trial && circuit.trial_in_flight => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful trial",
                    self.source
                );
                circuit.state = CircuitState::Closed;
                circuit.failure_count = 0;
                circuit.opened_at = None;
                circuit.trial_in_flight = false;
                circuit.reopened_from_trial = false;
                self.trial_settled.notify_one();
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(
                    "Circuit breaker: late success for '{}' while {}",
                    self.source, circuit.state
                );
            }
        }
    }

    /// Record a failed request.
    ///
    /// Increments failure count and may open the circuit.
    /// In HalfOpen state, a failed trial immediately reopens the circuit.
    pub fn record_failure(&self, trial: bool) {
        let mut circuit = self.lock_circuit();

        circuit.failure_count = circuit.failure_count.saturating_add(1);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        self.source, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        self.source, circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen if trial && circuit.trial_in_flight => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed trial",
                    self.source
                );
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.trial_in_flight = false;
                circuit.reopened_from_trial = true;
                self.trial_settled.notify_one();
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                debug!(
                    "Circuit breaker: late failure for '{}' while {}",
                    self.source, circuit.state
                );
            }
        }
    }

    /// Give back the HalfOpen trial without a health signal (fatal caller
    /// error, cancelled request, no provider available).
    pub fn release_trial(&self) {
        let mut circuit = self.lock_circuit();

        if circuit.state == CircuitState::HalfOpen && circuit.trial_in_flight {
            debug!("Circuit breaker: trial for '{}' released", self.source);
            circuit.trial_in_flight = false;
            self.trial_settled.notify_one();
        }
    }

    /// Whether backup providers should be preferred: the source is probing
    /// recovery, or its last trial failed.
    pub fn prefers_backup(&self) -> bool {
        let circuit = self.lock_circuit();
        circuit.state == CircuitState::HalfOpen || circuit.reopened_from_trial
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    /// Get the failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock_circuit().failure_count
    }

    /// Reset the circuit to Closed state.
    pub fn reset(&self) {
        let mut circuit = self.lock_circuit();
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            self.source
        );
        let had_trial = circuit.trial_in_flight;
        *circuit = Circuit::new();
        if had_trial {
            self.trial_settled.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::with_config(
            Source::ChainRpc,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: timeout,
            },
        )
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new(Source::ChainRpc);

        assert_eq!(cb.admit(), Admission::Closed);
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = breaker(3, Duration::from_secs(60));

        // First two failures don't open circuit
        cb.record_failure(false);
        cb.record_failure(false);
        assert_eq!(cb.admit(), Admission::Closed);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Third failure opens circuit
        cb.record_failure(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.admit(), Admission::Rejected { .. }));
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.record_failure(false);
        cb.record_failure(false);
        assert_eq!(cb.failure_count(), 2);

        cb.record_success(false);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_reports_remaining_time() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure(false);

        tokio::time::advance(Duration::from_secs(20)).await;

        match cb.admit() {
            Admission::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_transitions_to_half_open_with_single_trial() {
        let cb = breaker(1, Duration::from_millis(100));

        cb.record_failure(false);
        assert!(matches!(cb.admit(), Admission::Rejected { .. }));

        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(), Admission::Trial);
        assert_eq!(cb.admit(), Admission::TrialPending);
        assert!(cb.prefers_backup());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_on_success() {
        let cb = breaker(1, Duration::from_millis(10));

        cb.record_failure(false);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.admit(), Admission::Trial);

        cb.record_success(true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.admit(), Admission::Closed);
        assert!(!cb.prefers_backup());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_reopens_on_failure() {
        let cb = breaker(1, Duration::from_millis(10));

        cb.record_failure(false);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.admit(), Admission::Trial);

        cb.record_failure(true);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.admit(), Admission::Rejected { .. }));
        assert!(cb.prefers_backup());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_trial_allows_next_trial() {
        let cb = breaker(1, Duration::from_millis(10));

        cb.record_failure(false);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.admit(), Admission::Trial);

        cb.release_trial();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(), Admission::Trial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_settled_wakes_waiter() {
        let cb = std::sync::Arc::new(breaker(1, Duration::from_millis(10)));

        cb.record_failure(false);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.admit(), Admission::Trial);

        let waiter = {
            let cb = cb.clone();
            tokio::spawn(async move { cb.trial_settled().await })
        };

        cb.record_success(true);
        waiter.await.unwrap();
        assert_eq!(cb.admit(), Admission::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcomes_do_not_settle_trial() {
        let cb = breaker(1, Duration::from_millis(10));

        cb.record_failure(false);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.admit(), Admission::Trial);

        // Requests dispatched while Closed finish during the trial
        cb.record_failure(false);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(), Admission::TrialPending);

        cb.record_success(false);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(), Admission::TrialPending);

        cb.record_success(true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_manual_reset() {
        let cb = breaker(1, Duration::from_secs(60));

        cb.record_failure(false);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }
}

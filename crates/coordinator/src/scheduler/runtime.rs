//! Per-source runtime: queue, processor loop and completion handling.
//!
//! One processor task per source drains the queue one request at a time:
//!
//! 1. Wait for a concurrency slot (semaphore permit)
//! 2. Wait for a queued request
//! 3. Ask the circuit breaker for admission (fail fast, trial, or wait for the trial)
//! 4. Wait out the minimum spacing, then confirm admission again
//! 5. Pop the highest-priority request and select a provider
//! 6. Spawn the attempt; the permit is released when it finishes
//!
//! Completion updates the circuit breaker and provider state before the caller
//! is answered, then either delivers the result, requeues with backoff, or
//! rejects.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use log::{debug, info, warn};
use tokio::sync::{Notify, Semaphore};

use super::queue::{PushError, RequestQueue};
use super::rate_limiter::RateLimiter;
use super::request::{Job, QueuedRequest};
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::SourceSettings;
use crate::errors::{CoordinatorError, FailureClass, OperationError};
use crate::models::{Priority, ProviderEndpoint, Source, SourceStatus};
use crate::registry::{
    Admission, CircuitBreaker, CircuitBreakerConfig, ProviderRegistry, QuotaTracker,
};

/// All scheduling state of one source.
pub(crate) struct SourceRuntime {
    source: Source,
    settings: SourceSettings,
    queue: Mutex<RequestQueue<QueuedRequest>>,
    /// Signalled on every push into the queue.
    queued: Notify,
    slots: Arc<Semaphore>,
    /// Operations currently executing.
    active: AtomicUsize,
    pending_retries: AtomicUsize,
    circuit: CircuitBreaker,
    limiter: RateLimiter,
    retry: RetryPolicy,
    registry: Arc<ProviderRegistry>,
    quota: Arc<QuotaTracker>,
}

impl SourceRuntime {
    pub(crate) fn new(
        source: Source,
        settings: SourceSettings,
        registry: Arc<ProviderRegistry>,
        quota: Arc<QuotaTracker>,
    ) -> Self {
        let circuit = CircuitBreaker::with_config(
            source,
            CircuitBreakerConfig {
                failure_threshold: settings.cb_threshold,
                recovery_timeout: settings.cb_timeout(),
            },
        );

        Self {
            source,
            queue: Mutex::new(RequestQueue::new(settings.max_queue_depth)),
            queued: Notify::new(),
            slots: Arc::new(Semaphore::new(settings.max_concurrent)),
            active: AtomicUsize::new(0),
            pending_retries: AtomicUsize::new(0),
            circuit,
            limiter: RateLimiter::new(source, settings.min_delay()),
            retry: RetryPolicy::from_settings(&settings),
            registry,
            quota,
            settings,
        }
    }

    pub(crate) fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Lock the queue mutex, recovering from poison if necessary.
    fn lock_queue(&self) -> MutexGuard<'_, RequestQueue<QueuedRequest>> {
        self.queue.lock().unwrap_or_else(|poisoned| {
            warn!("Request queue mutex for '{}' was poisoned, recovering", self.source);
            poisoned.into_inner()
        })
    }

    /// Admit a new request into the queue.
    ///
    /// Fails immediately, without queueing, when the circuit is open or the
    /// queue is at its depth bound.
    pub(crate) fn submit(&self, job: Box<dyn Job>, priority: Priority) -> Result<(), CoordinatorError> {
        if let Err(retry_after) = self.circuit.check() {
            debug!("Rejecting {} request: circuit open", self.source);
            return Err(CoordinatorError::CircuitOpen {
                source_id: self.source,
                retry_after,
            });
        }

        let request = QueuedRequest::new(job, priority, self.settings.max_retries);
        let mut queue = self.lock_queue();
        match queue.push(priority, request) {
            Ok(()) => {
                debug!(
                    "Queued {:?} request for {} ({} waiting)",
                    priority,
                    self.source,
                    queue.len()
                );
                drop(queue);
                self.queued.notify_one();
                Ok(())
            }
            Err(PushError::Full(_)) => {
                warn!(
                    "Queue for {} is full ({} waiting), rejecting request",
                    self.source,
                    queue.len()
                );
                Err(CoordinatorError::QueueFull {
                    source_id: self.source,
                    depth: queue.len(),
                })
            }
            Err(PushError::Closed(_)) => Err(CoordinatorError::Shutdown {
                source_id: self.source,
            }),
        }
    }

    /// Processor loop. Runs until the coordinator aborts it.
    pub(crate) async fn run(self: Arc<Self>) {
        debug!("Processor for {} started", self.source);

        loop {
            let Ok(permit) = self.slots.clone().acquire_owned().await else {
                return;
            };

            self.wait_for_request().await;

            let trial = match self.admit().await {
                Admission::Closed => false,
                Admission::Trial => true,
                Admission::Rejected { retry_after } => {
                    self.reject_next(retry_after);
                    continue;
                }
                Admission::TrialPending => continue,
            };

            self.limiter.wait_for_permission().await;

            // The circuit may have opened while waiting out the spacing.
            let trial = match self.readmit(trial) {
                Ok(trial) => trial,
                Err(Some(retry_after)) => {
                    self.reject_next(retry_after);
                    continue;
                }
                Err(None) => continue,
            };

            let Some(request) = self.lock_queue().pop() else {
                self.settle_unused_trial(trial);
                continue;
            };

            if request.job.is_cancelled() {
                debug!("Dropping cancelled {} request", self.source);
                self.settle_unused_trial(trial);
                continue;
            }

            let prefer_backup = trial || self.circuit.prefers_backup();
            let provider = match self.registry.checkout(self.source, prefer_backup, &self.quota) {
                Ok(provider) => provider,
                Err(error) => {
                    self.settle_unused_trial(trial);
                    request.job.reject(error);
                    continue;
                }
            };

            debug!(
                "Dispatching {} request to '{}' (attempt {}, waited {:?}{})",
                self.source,
                provider.id,
                request.retry_count + 1,
                request.enqueued_at.elapsed(),
                if trial { ", trial" } else { "" }
            );

            self.active.fetch_add(1, Ordering::SeqCst);
            let runtime = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                runtime.attempt(request, provider, trial).await;
            });
        }
    }

    /// Wait until at least one request is queued.
    async fn wait_for_request(&self) {
        loop {
            if !self.lock_queue().is_empty() {
                return;
            }
            self.queued.notified().await;
        }
    }

    /// Ask the breaker for admission, waiting while a trial is in flight.
    async fn admit(&self) -> Admission {
        loop {
            match self.circuit.admit() {
                Admission::TrialPending => self.circuit.trial_settled().await,
                admission => return admission,
            }
        }
    }

    /// Confirm admission right before dispatch.
    ///
    /// A trial already holds the breaker's only HalfOpen slot. Otherwise the
    /// breaker is asked again: `Err(Some(_))` means the circuit is open,
    /// `Err(None)` that a trial is in flight and the request stays queued.
    fn readmit(&self, trial: bool) -> Result<bool, Option<Duration>> {
        if trial {
            return Ok(true);
        }
        match self.circuit.admit() {
            Admission::Closed => Ok(false),
            Admission::Trial => Ok(true),
            Admission::TrialPending => Err(None),
            Admission::Rejected { retry_after } => Err(Some(retry_after)),
        }
    }

    /// Fail the next queued request while the circuit is open.
    fn reject_next(&self, retry_after: Duration) {
        if let Some(request) = self.lock_queue().pop() {
            debug!("Circuit open for {}, failing queued request", self.source);
            request.job.reject(CoordinatorError::CircuitOpen {
                source_id: self.source,
                retry_after,
            });
        }
    }

    fn settle_unused_trial(&self, trial: bool) {
        if trial {
            self.circuit.release_trial();
        }
    }

    /// Run one attempt and handle its outcome.
    async fn attempt(self: Arc<Self>, request: QueuedRequest, provider: ProviderEndpoint, trial: bool) {
        let QueuedRequest {
            job,
            priority,
            enqueued_at,
            retry_count,
            max_retries,
        } = request;

        let endpoint = provider.clone();
        let outcome = AssertUnwindSafe(async move { job.run(endpoint).await })
            .catch_unwind()
            .await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let Ok(outcome) = outcome else {
            // The reply channel went down with the operation; the caller sees Shutdown.
            warn!("{} operation panicked on '{}'", self.source, provider.id);
            self.settle_unused_trial(trial);
            return;
        };

        match outcome {
            Ok(deliver) => {
                self.circuit.record_success(trial);
                self.registry.record_success(self.source, &provider.id);
                deliver();
            }
            Err((job, error)) => {
                let request = QueuedRequest {
                    job,
                    priority,
                    enqueued_at,
                    retry_count,
                    max_retries,
                };
                self.handle_failure(request, &provider, error, trial);
            }
        }
    }

    fn handle_failure(
        self: &Arc<Self>,
        mut request: QueuedRequest,
        provider: &ProviderEndpoint,
        error: OperationError,
        trial: bool,
    ) {
        let class = error.class();

        if class.affects_circuit() {
            self.circuit.record_failure(trial);
        } else {
            self.settle_unused_trial(trial);
        }

        match class {
            FailureClass::Fatal => {}
            FailureClass::RateLimited => {
                self.registry
                    .cool_down(self.source, &provider.id, self.settings.provider_cooldown());
            }
            FailureClass::Transient => {
                self.registry.record_failure(
                    self.source,
                    &provider.id,
                    self.settings.provider_failure_threshold,
                    self.settings.provider_cooldown(),
                );
            }
        }

        let attempts = request.retry_count + 1;
        match self.retry.decide(
            class,
            request.retry_count,
            request.max_retries,
            error.retry_after(),
        ) {
            RetryDecision::Requeue { delay } => {
                debug!(
                    "{} request failed on '{}' ({}), retrying in {:?}",
                    self.source, provider.id, error, delay
                );
                request.retry_count = attempts;
                self.requeue_after(request, delay);
            }
            RetryDecision::Exhausted => {
                warn!(
                    "{} request failed on '{}' after {} attempts: {}",
                    self.source, provider.id, attempts, error
                );
                let rejection = match class {
                    FailureClass::RateLimited => CoordinatorError::RateLimited {
                        source_id: self.source,
                        provider: provider.id.clone(),
                        attempts,
                    },
                    _ => CoordinatorError::RetryExhausted {
                        source_id: self.source,
                        attempts,
                        last: error,
                    },
                };
                request.job.reject(rejection);
            }
            RetryDecision::Reject => {
                warn!(
                    "{} request failed fatally on '{}': {}",
                    self.source, provider.id, error
                );
                request.job.reject(CoordinatorError::Fatal {
                    source_id: self.source,
                    message: error.to_string(),
                });
            }
        }
    }

    /// Put a request back in its tier once `delay` has elapsed.
    fn requeue_after(self: &Arc<Self>, request: QueuedRequest, delay: Duration) {
        self.pending_retries.fetch_add(1, Ordering::SeqCst);

        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            runtime.pending_retries.fetch_sub(1, Ordering::SeqCst);

            let priority = request.priority;
            let pushed = runtime.lock_queue().push_retry(priority, request);
            match pushed {
                Ok(()) => runtime.queued.notify_one(),
                Err(PushError::Closed(request)) | Err(PushError::Full(request)) => {
                    request.job.reject(CoordinatorError::Shutdown {
                        source_id: runtime.source,
                    });
                }
            }
        });
    }

    /// Refuse new work and fail everything still queued.
    pub(crate) fn close(&self) {
        let drained = self.lock_queue().close();
        if !drained.is_empty() {
            info!(
                "Shutting down {}: failing {} queued requests",
                self.source,
                drained.len()
            );
        }
        for request in drained {
            request.job.reject(CoordinatorError::Shutdown {
                source_id: self.source,
            });
        }
        self.slots.close();
    }

    /// Read-only snapshot. Only takes short synchronous locks.
    pub(crate) fn status(&self) -> SourceStatus {
        let queue_length = self.lock_queue().len();
        let max_concurrent = self.settings.max_concurrent;

        SourceStatus {
            source: self.source,
            queue_length,
            pending_retries: self.pending_retries.load(Ordering::SeqCst),
            active_requests: self.active.load(Ordering::SeqCst),
            max_concurrent,
            circuit_state: self.circuit.state(),
            failure_count: self.circuit.failure_count(),
            providers: self.registry.utilization(self.source),
        }
    }
}

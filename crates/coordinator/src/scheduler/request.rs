//! Queued requests.
//!
//! A caller's operation and its reply channel are erased behind [`Job`] so
//! that requests of any result type can share one per-source queue.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::errors::{CoordinatorError, OperationError};
use crate::models::{Priority, ProviderEndpoint};

/// Hands a successful result to the caller. Called after the coordinator has
/// recorded the success, so callers observe consistent state.
pub(crate) type Delivery = Box<dyn FnOnce() + Send>;

/// A failed attempt gives the job back for a possible retry.
pub(crate) type AttemptResult = Result<Delivery, (Box<dyn Job>, OperationError)>;

/// Type-erased caller request.
pub(crate) trait Job: Send + 'static {
    /// Run one attempt against `provider`.
    fn run(self: Box<Self>, provider: ProviderEndpoint) -> BoxFuture<'static, AttemptResult>;

    /// Fail the request.
    fn reject(self: Box<Self>, error: CoordinatorError);

    /// The caller stopped waiting.
    fn is_cancelled(&self) -> bool;
}

/// A typed operation plus the channel its result goes back on.
pub(crate) struct OperationJob<F, T> {
    operation: F,
    reply: oneshot::Sender<Result<T, CoordinatorError>>,
}

impl<F, T> OperationJob<F, T> {
    pub(crate) fn new(operation: F, reply: oneshot::Sender<Result<T, CoordinatorError>>) -> Self {
        Self { operation, reply }
    }
}

impl<F, Fut, T> Job for OperationJob<F, T>
where
    F: Fn(ProviderEndpoint) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>, provider: ProviderEndpoint) -> BoxFuture<'static, AttemptResult> {
        let attempt = (self.operation)(provider);
        Box::pin(async move {
            match attempt.await {
                Ok(value) => {
                    let reply = self.reply;
                    // Ignore a dropped receiver: the caller gave up waiting.
                    let delivery: Delivery = Box::new(move || {
                        let _ = reply.send(Ok(value));
                    });
                    Ok(delivery)
                }
                Err(error) => Err((self as Box<dyn Job>, error)),
            }
        })
    }

    fn reject(self: Box<Self>, error: CoordinatorError) {
        let _ = self.reply.send(Err(error));
    }

    fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }
}

/// A request waiting in (or travelling through) a source's queue.
pub(crate) struct QueuedRequest {
    pub(crate) job: Box<dyn Job>,
    pub(crate) priority: Priority,
    pub(crate) enqueued_at: Instant,
    /// Attempts already made.
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
}

impl QueuedRequest {
    pub(crate) fn new(job: Box<dyn Job>, priority: Priority, max_retries: u32) -> Self {
        Self {
            job,
            priority,
            enqueued_at: Instant::now(),
            retry_count: 0,
            max_retries,
        }
    }
}

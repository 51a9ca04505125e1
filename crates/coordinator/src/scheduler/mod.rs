//! Request scheduling.
//!
//! Everything that decides *when* a request runs:
//! - `queue` - Two-tier bounded queue (High before Normal, FIFO within a tier)
//! - `rate_limiter` - Minimum spacing between dispatches of a source
//! - `retry` - Backoff and the requeue/exhaust/reject decision
//! - `request` - Type-erased queued requests
//! - `runtime` - The per-source processor tying the pieces together

mod queue;
mod rate_limiter;
mod request;
mod retry;
mod runtime;

pub use queue::{PushError, RequestQueue};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};

pub(crate) use request::OperationJob;
pub(crate) use runtime::SourceRuntime;

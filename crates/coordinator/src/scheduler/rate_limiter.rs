//! Minimum-spacing rate limiter for a single source.
//!
//! Each grant reserves the next dispatch slot `min_delay` after the previous
//! one. The reservation is taken the moment permission is granted, not when
//! the operation completes, so concurrent callers queue up behind each other
//! instead of bursting.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::models::Source;

/// Spacing gate enforcing `min_delay` between consecutive dispatches.
pub struct RateLimiter {
    source: Source,
    min_delay: Duration,
    /// Time of the last granted dispatch (possibly in the future).
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(source: Source, min_delay: Duration) -> Self {
        Self {
            source,
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Lock the last-request mutex, recovering from poison if necessary.
    ///
    /// A poisoned lock at worst yields one slightly early dispatch, which is
    /// better than panicking.
    fn lock_last_request(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_request.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex for '{}' was poisoned, recovering", self.source);
            poisoned.into_inner()
        })
    }

    /// Reserve the next dispatch slot and return how long to wait for it.
    ///
    /// `required_delay = max(0, min_delay - (now - last_request))`.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut last_request = self.lock_last_request();

        let delay = match *last_request {
            Some(last) => (last + self.min_delay).saturating_duration_since(now),
            None => Duration::ZERO,
        };

        *last_request = Some(now + delay);
        delay
    }

    /// Wait until the source may dispatch again.
    pub async fn wait_for_permission(&self) {
        let delay = self.reserve();

        if delay > Duration::ZERO {
            debug!(
                "Rate limiter: waiting {:?} before next '{}' dispatch",
                delay, self.source
            );
            tokio::time::sleep(delay).await;
        }
    }
}

//! Error types and failure classification for the coordinator crate.
//!
//! This module provides:
//! - [`OperationError`]: failures reported by caller operations, already mapped
//!   from transport details at the adapter boundary
//! - [`FailureClass`]: classification that drives the retry policy
//! - [`CoordinatorError`]: errors surfaced to callers of `execute`

mod retry;

pub use retry::FailureClass;

use std::time::Duration;

use thiserror::Error;

use crate::models::{ProviderId, Source};

/// Failure of a single attempt of a caller operation.
///
/// Operations must map their transport-specific failures into one of these
/// variants before returning; the coordinator never inspects messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The provider throttled the request.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Description of the throttling response
        message: String,
        /// Provider-supplied hint (e.g. `Retry-After`) for when to try again
        retry_after: Option<Duration>,
    },

    /// Timeout, connection failure or server-side error.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Malformed request, authorization failure or other caller bug.
    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl OperationError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns the failure classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use ratekeeper_coordinator::errors::{FailureClass, OperationError};
    ///
    /// let error = OperationError::rate_limited("429 Too Many Requests");
    /// assert_eq!(error.class(), FailureClass::RateLimited);
    ///
    /// let error = OperationError::fatal("invalid params");
    /// assert_eq!(error.class(), FailureClass::Fatal);
    /// ```
    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited { .. } => FailureClass::RateLimited,
            Self::Transient(_) => FailureClass::Transient,
            Self::Fatal(_) => FailureClass::Fatal,
        }
    }

    /// Provider-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors surfaced to callers of the coordinator.
///
/// Retries are invisible: a caller only sees an error once the request can no
/// longer be dispatched or its retry budget is spent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// Every provider of the source is deactivated (quota or cooldown).
    #[error("No active provider for {source_id}")]
    NoActiveProvider { source_id: Source },

    /// The source's circuit is open; no operation was invoked.
    #[error("Circuit open for {source_id}, retry in {retry_after:?}")]
    CircuitOpen {
        source_id: Source,
        /// Time left until the circuit admits a trial request
        retry_after: Duration,
    },

    /// The provider kept throttling until the retry budget was spent.
    #[error("Rate limited by {provider} on {source_id} after {attempts} attempts")]
    RateLimited {
        source_id: Source,
        /// The provider that served the last attempt
        provider: ProviderId,
        attempts: u32,
    },

    /// Transient failures until the retry budget was spent.
    #[error("Retries exhausted for {source_id} after {attempts} attempts: {last}")]
    RetryExhausted {
        source_id: Source,
        attempts: u32,
        /// The failure of the final attempt
        last: OperationError,
    },

    /// The source's queue is at its configured depth; the request was not queued.
    #[error("Queue full for {source_id} ({depth} requests waiting)")]
    QueueFull { source_id: Source, depth: usize },

    /// The operation failed in a way retrying cannot fix.
    #[error("Fatal failure on {source_id}: {message}")]
    Fatal { source_id: Source, message: String },

    /// `execute` was called for a source with no configuration block.
    #[error("Source not configured: {0}")]
    SourceNotConfigured(Source),

    /// Configuration failed startup validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The coordinator could not spawn its background tasks.
    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    /// The coordinator was dropped before the request completed.
    #[error("Coordinator shut down while {source_id} request was pending")]
    Shutdown { source_id: Source },
}

impl CoordinatorError {
    /// The source the error relates to, when there is one.
    pub fn source_id(&self) -> Option<Source> {
        match self {
            Self::NoActiveProvider { source_id }
            | Self::CircuitOpen { source_id, .. }
            | Self::RateLimited { source_id, .. }
            | Self::RetryExhausted { source_id, .. }
            | Self::QueueFull { source_id, .. }
            | Self::Fatal { source_id, .. }
            | Self::Shutdown { source_id } => Some(*source_id),
            Self::SourceNotConfigured(source) => Some(*source),
            Self::InvalidConfig(_) | Self::Runtime(_) => None,
        }
    }
}

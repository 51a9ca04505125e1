//! Ratekeeper Coordinator Crate
//!
//! This crate coordinates access from many workers to a small set of
//! rate-limited external services: blockchain JSON-RPC nodes, market-data
//! feeds and block-explorer APIs.
//!
//! # Overview
//!
//! The coordinator supports:
//! - Least-utilization provider selection with daily quotas
//! - Minimum spacing and a concurrency cap per source
//! - Priority queueing (High before Normal, FIFO within a tier)
//! - Circuit breaking with a single half-open trial
//! - Retry with exponential backoff, jitter and rate-limit cooldowns
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |  Worker / Caller |  execute(source, operation, priority)
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! |  RequestQueue    | <-- |  CircuitBreaker  |  (fail fast while Open)
//! +------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! |  Processor       |  (semaphore slot + minimum spacing)
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! | ProviderSelector | <-- |  QuotaTracker    |  (daily limits)
//! +------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! | operation(ep)    |  --> success / RetryPolicy (requeue or reject)
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Coordinator`] - One per process, shared through `Arc`
//! - [`WorkerHandle`] - A worker's handle applying its startup stagger
//! - [`CoordinatorConfig`] - Sources, their settings and providers
//! - [`ProviderEndpoint`] - What an operation receives for each attempt
//! - [`OperationError`] - How operations report failures
//! - [`CoordinatorError`] - What callers see when a request cannot complete
//! - [`SourceStatus`] - Monitoring snapshot of one source

pub mod adapter;
pub mod config;
mod coordinator;
pub mod errors;
pub mod models;
pub mod registry;
pub mod scheduler;
mod worker;

pub use config::{CoordinatorConfig, ProviderConfig, SourceConfig, SourceSettings};
pub use coordinator::Coordinator;
pub use errors::{CoordinatorError, FailureClass, OperationError};
pub use models::{
    Priority, ProviderEndpoint, ProviderId, ProviderUtilization, Source, SourceStatus,
    WorkerIdentity,
};
pub use registry::{CircuitState, ProviderRegistry, QuotaTracker};
pub use worker::WorkerHandle;

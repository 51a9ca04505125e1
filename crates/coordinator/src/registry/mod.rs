//! Provider registry module.
//!
//! This module provides the provider-side state of the coordinator:
//! - Provider registration and least-utilization selection
//! - Daily quota tracking and rollover
//! - Circuit breaking per source

mod circuit_breaker;
mod provider_registry;
mod quota;
mod selector;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use provider_registry::{ProviderRegistry, ProviderState};
pub use quota::QuotaTracker;
pub use selector::ProviderSelector;

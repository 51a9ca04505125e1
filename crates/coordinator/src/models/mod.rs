//! Coordinator models
//!
//! This module contains the core data types shared by the coordinator:
//! - `types` - Type aliases for common identifiers (ProviderId)
//! - `source` - The closed set of logical capabilities (Source) and request Priority
//! - `provider` - The endpoint handed to caller operations (ProviderEndpoint)
//! - `worker` - Worker identity and its startup stagger (WorkerIdentity)
//! - `status` - Read-only snapshots for monitoring (SourceStatus, ProviderUtilization)

mod provider;
mod source;
mod status;
mod types;
mod worker;

pub use provider::ProviderEndpoint;
pub use source::{Priority, Source};
pub use status::{ProviderUtilization, SourceStatus};
pub use types::ProviderId;
pub use worker::WorkerIdentity;

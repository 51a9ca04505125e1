use std::sync::Arc;

use super::source::Source;
use super::types::ProviderId;

/// The concrete endpoint an operation is bound to for one attempt.
///
/// Handed to the caller-supplied operation by value; cheap to clone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderEndpoint {
    /// Provider identifier from configuration.
    pub id: ProviderId,
    /// Base URL of the endpoint (RPC URL, API root, ...).
    pub base_url: Arc<str>,
    /// The source this provider serves.
    pub source: Source,
    /// Whether the provider is a non-primary fallback.
    pub backup: bool,
}

use serde::Serialize;

use super::source::Source;
use super::types::ProviderId;
use crate::registry::CircuitState;

/// Read-only snapshot of one source, for monitoring collaborators.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source: Source,
    /// Requests waiting in the queue (both tiers).
    pub queue_length: usize,
    /// Failed requests sleeping out their backoff before being requeued.
    pub pending_retries: usize,
    /// Operations currently in flight.
    pub active_requests: usize,
    pub max_concurrent: usize,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub providers: Vec<ProviderUtilization>,
}

/// Utilization of a single provider.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUtilization {
    pub id: ProviderId,
    pub request_count: u64,
    pub daily_limit: u64,
    /// `request_count / daily_limit`.
    pub utilization: f64,
    pub is_active: bool,
    pub backup: bool,
    pub quota_exhausted: bool,
    pub cooling_down: bool,
}

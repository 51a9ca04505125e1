//! Periodic status reporting.

use std::sync::Arc;
use std::time::Duration;

use ratekeeper_coordinator::Coordinator;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Log a status snapshot of every source each `period`.
pub fn start_status_reporter(coordinator: Arc<Coordinator>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Status reporter started ({:?} interval)", period);

        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            report(&coordinator);
        }
    })
}

fn report(coordinator: &Coordinator) {
    for source in coordinator.sources() {
        let status = match coordinator.status(source) {
            Ok(status) => status,
            Err(e) => {
                warn!("Status unavailable for {}: {}", source, e);
                continue;
            }
        };

        let active_providers = status.providers.iter().filter(|p| p.is_active).count();
        info!(
            source = %status.source,
            circuit = %status.circuit_state,
            queue = status.queue_length,
            retries = status.pending_retries,
            in_flight = status.active_requests,
            failures = status.failure_count,
            providers = status.providers.len(),
            active_providers,
            "source status"
        );

        for provider in &status.providers {
            if !provider.is_active {
                warn!(
                    source = %status.source,
                    provider = %provider.id,
                    quota_exhausted = provider.quota_exhausted,
                    cooling_down = provider.cooling_down,
                    "provider inactive"
                );
            }
        }

        match serde_json::to_string(&status) {
            Ok(json) => debug!("{}", json),
            Err(e) => warn!("Failed to serialize {} status: {}", source, e),
        }
    }
}

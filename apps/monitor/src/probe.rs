//! Staggered probe workers.
//!
//! Each worker asks the coordinator for the current block number every
//! probe interval. All workers share one coordinator, so the probes are
//! spread across the configured `chain-rpc` providers and never exceed
//! their spacing or quotas.

use std::sync::Arc;
use std::time::Duration;

use ratekeeper_coordinator::adapter::{parse_quantity, rpc_call};
use ratekeeper_coordinator::{Coordinator, OperationError, Priority, ProviderId, Source, WorkerHandle};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn `count` probe workers with ids `1..=count`.
pub fn spawn_workers(
    coordinator: &Arc<Coordinator>,
    client: reqwest::Client,
    count: u32,
    interval: Duration,
) -> Vec<JoinHandle<()>> {
    if !coordinator.sources().contains(&Source::ChainRpc) {
        warn!("No chain-rpc source configured, probes disabled");
        return Vec::new();
    }

    (1..=count)
        .map(|id| {
            let worker = coordinator.worker(id);
            let client = client.clone();
            tokio::spawn(run_worker(worker, client, interval))
        })
        .collect()
}

async fn run_worker(worker: WorkerHandle, client: reqwest::Client, interval: Duration) {
    let id = worker.identity().id;
    info!(
        "Probe worker {} starting (stagger {:?})",
        id,
        worker.stagger_offset()
    );

    loop {
        match probe_block_number(&worker, &client).await {
            Ok((provider, block)) => {
                info!(worker = id, provider = %provider, block, "eth_blockNumber");
            }
            Err(e) => {
                warn!(worker = id, "Probe failed: {}", e);
            }
        }
        tokio::time::sleep(interval).await;
    }
}

async fn probe_block_number(
    worker: &WorkerHandle,
    client: &reqwest::Client,
) -> Result<(ProviderId, u64), ratekeeper_coordinator::CoordinatorError> {
    let client = client.clone();
    worker
        .execute(
            Source::ChainRpc,
            move |endpoint| {
                let client = client.clone();
                async move {
                    debug!("Probing '{}'", endpoint.id);
                    let hex: String =
                        rpc_call(&client, &endpoint, "eth_blockNumber", serde_json::json!([]))
                            .await?;
                    let block = parse_quantity(&hex)?;
                    Ok::<_, OperationError>((endpoint.id, block))
                }
            },
            Priority::Normal,
        )
        .await
}

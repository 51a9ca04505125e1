mod config;
mod probe;
mod report;

use anyhow::Context;
use ratekeeper_coordinator::{Coordinator, CoordinatorConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config.log_format);

    let coordinator_config = CoordinatorConfig::from_path(&config.config_path)
        .with_context(|| format!("Failed to load coordinator config from {}", config.config_path))?;
    let coordinator = Coordinator::start(coordinator_config)?;
    tracing::info!(
        "Coordinator started for {:?} with {} workers",
        coordinator.sources(),
        config.workers
    );

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let reporter = report::start_status_reporter(coordinator.clone(), config.status_interval);
    let workers = probe::spawn_workers(&coordinator, client, config.workers, config.probe_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for worker in workers {
        worker.abort();
    }
    reporter.abort();
    Ok(())
}

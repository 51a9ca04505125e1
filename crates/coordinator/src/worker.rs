//! Per-worker handle applying the startup stagger.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::OnceCell;

use crate::coordinator::Coordinator;
use crate::errors::{CoordinatorError, OperationError};
use crate::models::{Priority, ProviderEndpoint, Source, WorkerIdentity};

/// A worker's view of the shared [`Coordinator`].
///
/// The first `execute` through a handle waits out the worker's stagger offset
/// (`(id - 1) * base_stagger`); concurrent first calls share that one wait and
/// later calls are not delayed. Every handle for the same worker id shares the
/// stagger state, so a worker is staggered once per coordinator.
#[derive(Clone)]
pub struct WorkerHandle {
    coordinator: Arc<Coordinator>,
    identity: WorkerIdentity,
    offset: Duration,
    staggered: Arc<OnceCell<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        coordinator: Arc<Coordinator>,
        identity: WorkerIdentity,
        base_stagger: Duration,
        staggered: Arc<OnceCell<()>>,
    ) -> Self {
        Self {
            coordinator,
            identity,
            offset: identity.stagger_offset(base_stagger),
            staggered,
        }
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    /// Startup offset of this worker.
    pub fn stagger_offset(&self) -> Duration {
        self.offset
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// [`Coordinator::execute`] after the one-time stagger.
    pub async fn execute<F, Fut, T>(
        &self,
        source: Source,
        operation: F,
        priority: Priority,
    ) -> Result<T, CoordinatorError>
    where
        F: Fn(ProviderEndpoint) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
        T: Send + 'static,
    {
        self.staggered
            .get_or_init(|| async {
                if !self.offset.is_zero() {
                    debug!(
                        "Worker {} staggering first request by {:?}",
                        self.identity.id, self.offset
                    );
                    tokio::time::sleep(self.offset).await;
                }
            })
            .await;

        self.coordinator.execute(source, operation, priority).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinatorConfig, ProviderConfig, SourceConfig, SourceSettings};
    use tokio::time::Instant;

    fn config() -> CoordinatorConfig {
        let settings = SourceSettings {
            min_delay_ms: 0,
            ..SourceSettings::default()
        };
        let mut config = CoordinatorConfig::new(vec![SourceConfig::new(
            Source::PriceFeed,
            settings,
            vec![ProviderConfig::new("feed", "https://feed.example", 1_000)],
        )]);
        config.base_stagger_ms = 1_000;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_stagger_applies_once() {
        let coordinator = Coordinator::start(config()).unwrap();
        let worker = coordinator.worker(3);
        assert_eq!(worker.stagger_offset(), Duration::from_secs(2));

        let start = Instant::now();
        worker
            .execute(Source::PriceFeed, |_| async { Ok::<_, OperationError>(()) }, Priority::Normal)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        let second = Instant::now();
        worker
            .execute(Source::PriceFeed, |_| async { Ok::<_, OperationError>(()) }, Priority::Normal)
            .await
            .unwrap();
        assert!(second.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_handles_share_stagger() {
        let coordinator = Coordinator::start(config()).unwrap();

        let start = Instant::now();
        coordinator
            .worker(3)
            .execute(Source::PriceFeed, |_| async { Ok::<_, OperationError>(()) }, Priority::Normal)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        let again = Instant::now();
        coordinator
            .worker(3)
            .execute(Source::PriceFeed, |_| async { Ok::<_, OperationError>(()) }, Priority::Normal)
            .await
            .unwrap();
        assert!(again.elapsed() < Duration::from_secs(1));

        // Other ids keep their own stagger
        let other = Instant::now();
        coordinator
            .worker(2)
            .execute(Source::PriceFeed, |_| async { Ok::<_, OperationError>(()) }, Priority::Normal)
            .await
            .unwrap();
        assert!(other.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_worker_is_not_delayed() {
        let coordinator = Coordinator::start(config()).unwrap();
        let worker = coordinator.worker(1);

        let start = Instant::now();
        worker
            .execute(Source::PriceFeed, |_| async { Ok::<_, OperationError>(7) }, Priority::High)
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}

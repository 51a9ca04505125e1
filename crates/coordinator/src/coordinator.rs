//! The process-wide coordinator.
//!
//! Owns one [`SourceRuntime`] per configured source plus the shared provider
//! registry and quota tracker. Every worker in the process submits through the
//! same `Arc<Coordinator>`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;

use crate::config::CoordinatorConfig;
use crate::errors::{CoordinatorError, OperationError};
use crate::models::{Priority, ProviderEndpoint, Source, SourceStatus, WorkerIdentity};
use crate::registry::{ProviderRegistry, QuotaTracker};
use crate::scheduler::{OperationJob, SourceRuntime};
use crate::worker::WorkerHandle;

/// Shared access coordinator for every configured source.
pub struct Coordinator {
    sources: HashMap<Source, Arc<SourceRuntime>>,
    registry: Arc<ProviderRegistry>,
    quota: Arc<QuotaTracker>,
    base_stagger: Duration,
    runtime: Handle,
    /// Processor and monitor tasks, aborted on drop.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// One-time stagger state per worker id.
    staggers: Mutex<HashMap<u32, Arc<OnceCell<()>>>>,
}

impl Coordinator {
    /// Validate `config`, build every source and start the background tasks.
    ///
    /// Must be called from within a tokio runtime. The quota monitor is started
    /// with the configured check interval.
    pub fn start(config: CoordinatorConfig) -> Result<Arc<Self>, CoordinatorError> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|e| CoordinatorError::Runtime(e.to_string()))?;
        let registry = Arc::new(ProviderRegistry::from_config(&config)?);
        let quota = Arc::new(QuotaTracker::new(&registry.sources(), Utc::now()));

        let mut sources = HashMap::new();
        let mut tasks = Vec::new();
        for source_config in &config.sources {
            let source_runtime = Arc::new(SourceRuntime::new(
                source_config.source,
                source_config.settings.clone(),
                registry.clone(),
                quota.clone(),
            ));
            tasks.push(runtime.spawn(source_runtime.clone().run()));
            sources.insert(source_config.source, source_runtime);

            info!(
                "Coordinator: {} ready with {} providers",
                source_config.source,
                source_config.providers.len()
            );
        }

        let coordinator = Arc::new(Self {
            sources,
            registry,
            quota,
            base_stagger: config.base_stagger(),
            runtime,
            tasks: Mutex::new(tasks),
            staggers: Mutex::new(HashMap::new()),
        });
        coordinator.spawn_quota_monitor(config.quota_check_interval());

        Ok(coordinator)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            warn!("Coordinator task list mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn runtime(&self, source: Source) -> Result<&Arc<SourceRuntime>, CoordinatorError> {
        self.sources
            .get(&source)
            .ok_or(CoordinatorError::SourceNotConfigured(source))
    }

    /// Run `operation` against a provider of `source`, with queueing, spacing,
    /// circuit breaking and retries applied.
    ///
    /// The operation is invoked once per attempt with the provider selected for
    /// that attempt. Fails without queueing when the source's circuit is open
    /// or its queue is full.
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
        let runtime = self.runtime(source)?;

        let (reply, response) = oneshot::channel();
        runtime.submit(Box::new(OperationJob::new(operation, reply)), priority)?;

        response
            .await
            .unwrap_or(Err(CoordinatorError::Shutdown { source_id: source }))
    }

    /// A handle that applies `id`'s startup stagger before its first request.
    ///
    /// Handles for the same id share the stagger, so it is applied once per
    /// worker no matter how many handles are taken.
    pub fn worker(self: &Arc<Self>, id: u32) -> WorkerHandle {
        let staggered = self
            .staggers
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!("Coordinator stagger mutex was poisoned, recovering");
                poisoned.into_inner()
            })
            .entry(id)
            .or_default()
            .clone();
        WorkerHandle::new(self.clone(), WorkerIdentity::new(id), self.base_stagger, staggered)
    }

    /// Snapshot of a source for monitoring. Never waits on in-flight work.
    pub fn status(&self, source: Source) -> Result<SourceStatus, CoordinatorError> {
        Ok(self.runtime(source)?.status())
    }

    /// Configured sources, in declaration order of [`Source`].
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.sources.keys().copied().collect();
        sources.sort();
        sources
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Force a source's circuit back to Closed.
    pub fn reset_circuit(&self, source: Source) -> Result<(), CoordinatorError> {
        self.runtime(source)?.circuit().reset();
        Ok(())
    }

    /// Run the daily rollover check once. Returns the sources that rolled over.
    pub fn check_quota_rollover(&self, now: DateTime<Utc>) -> Vec<Source> {
        self.quota.check_rollover(&self.registry, now)
    }

    /// Start a background task calling [`Self::check_quota_rollover`] every
    /// `interval`. The task ends once the coordinator is dropped.
    pub fn spawn_quota_monitor(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            warn!("Quota monitor not started: interval must be non-zero");
            return;
        }

        let coordinator: Weak<Self> = Arc::downgrade(self);

        let task = self.runtime.spawn(async move {
            debug!("Quota monitor started ({:?} interval)", interval);

            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; the quota period just started.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    return;
                };
                let rolled = coordinator.check_quota_rollover(Utc::now());
                if !rolled.is_empty() {
                    debug!("Quota monitor reset {:?}", rolled);
                }
            }
        });

        self.lock_tasks().push(task);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        for runtime in self.sources.values() {
            runtime.close();
        }
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        debug!("Coordinator shut down");
    }
}

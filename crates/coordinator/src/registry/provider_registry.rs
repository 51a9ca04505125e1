//! Provider registry holding configuration and live state of every provider.
//!
//! The registry manages the providers of each source, handling:
//! - Provider registration at startup
//! - Selection of the provider serving the next dispatch
//! - Cooldowns after throttling or repeated connection failures
//! - Utilization snapshots for monitoring

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use super::{ProviderSelector, QuotaTracker};
use crate::config::{CoordinatorConfig, ProviderConfig};
use crate::errors::CoordinatorError;
use crate::models::{ProviderEndpoint, ProviderUtilization, Source};

/// Live state of one provider.
#[derive(Clone, Debug)]
pub struct ProviderState {
    pub(crate) config: ProviderConfig,
    pub(crate) base_url: Arc<str>,
    /// Requests dispatched since the last daily rollover.
    pub(crate) request_count: u64,
    /// Set once `request_count` crosses the buffered daily ceiling.
    pub(crate) quota_exhausted: bool,
    /// Provider is out of rotation until this instant.
    pub(crate) cooldown_until: Option<Instant>,
    pub(crate) consecutive_failures: u32,
}

impl ProviderState {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = Arc::from(config.base_url.as_str());
        Self {
            config,
            base_url,
            request_count: 0,
            quota_exhausted: false,
            cooldown_until: None,
            consecutive_failures: 0,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Active unless quota-exhausted or cooling down.
    pub fn is_active(&self, now: Instant) -> bool {
        !self.quota_exhausted && !self.is_cooling_down(now)
    }

    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Fraction of the daily limit already used.
    pub fn utilization(&self) -> f64 {
        self.request_count as f64 / self.config.daily_limit as f64
    }

    /// Request count at which the provider is deactivated for the day.
    pub fn quota_ceiling(&self) -> u64 {
        (self.config.daily_limit as f64 * (1.0 - self.config.rate_limit_buffer)).floor() as u64
    }

    fn endpoint(&self, source: Source) -> ProviderEndpoint {
        ProviderEndpoint {
            id: self.config.id.clone(),
            base_url: self.base_url.clone(),
            source,
            backup: self.config.backup,
        }
    }

    fn snapshot(&self, now: Instant) -> ProviderUtilization {
        ProviderUtilization {
            id: self.config.id.clone(),
            request_count: self.request_count,
            daily_limit: self.config.daily_limit,
            utilization: self.utilization(),
            is_active: self.is_active(now),
            backup: self.config.backup,
            quota_exhausted: self.quota_exhausted,
            cooling_down: self.is_cooling_down(now),
        }
    }
}

/// Registry of providers, grouped by source.
///
/// Each source's providers sit behind their own mutex so that workers on
/// different sources never contend.
pub struct ProviderRegistry {
    sources: HashMap<Source, Mutex<Vec<ProviderState>>>,
    selector: ProviderSelector,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            selector: ProviderSelector::new(),
        }
    }

    /// Build a registry holding every provider of a validated configuration.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let mut registry = Self::new();
        for source_config in &config.sources {
            for provider in &source_config.providers {
                registry.register(provider.clone(), source_config.source)?;
            }
        }
        Ok(registry)
    }

    /// Register a provider for a source. Only possible during initialization.
    pub fn register(&mut self, provider: ProviderConfig, source: Source) -> Result<(), CoordinatorError> {
        let providers = self
            .sources
            .entry(source)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if providers.iter().any(|p| p.config.id == provider.id) {
            return Err(CoordinatorError::InvalidConfig(format!(
                "{}: provider '{}' registered twice",
                source, provider.id
            )));
        }

        debug!("Registering provider '{}' for {}", provider.id, source);
        providers.push(ProviderState::new(provider));
        Ok(())
    }

    /// Sources with at least one registered provider.
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.sources.keys().copied().collect();
        sources.sort();
        sources
    }

    pub fn provider_count(&self, source: Source) -> usize {
        self.with_providers(source, |providers| providers.len())
            .unwrap_or(0)
    }

    /// Lock a source's providers, recovering from poison if necessary.
    fn lock_providers(&self, source: Source) -> Option<MutexGuard<'_, Vec<ProviderState>>> {
        self.sources.get(&source).map(|providers| {
            providers.lock().unwrap_or_else(|poisoned| {
                warn!("Provider registry mutex for '{}' was poisoned, recovering", source);
                poisoned.into_inner()
            })
        })
    }

    /// Run `f` with exclusive access to a source's providers.
    pub(crate) fn with_providers<R>(
        &self,
        source: Source,
        f: impl FnOnce(&mut Vec<ProviderState>) -> R,
    ) -> Option<R> {
        self.lock_providers(source).map(|mut providers| f(&mut providers))
    }

    /// Choose the provider that would serve the next dispatch, without
    /// counting it against the quota.
    pub fn select_provider(
        &self,
        source: Source,
        prefer_backup: bool,
    ) -> Result<ProviderEndpoint, CoordinatorError> {
        let providers = self
            .lock_providers(source)
            .ok_or(CoordinatorError::SourceNotConfigured(source))?;

        self.selector
            .pick(&providers, prefer_backup, Instant::now())
            .map(|i| providers[i].endpoint(source))
            .ok_or(CoordinatorError::NoActiveProvider { source_id: source })
    }

    /// Select a provider and count the dispatch against its quota, atomically.
    pub(crate) fn checkout(
        &self,
        source: Source,
        prefer_backup: bool,
        quota: &QuotaTracker,
    ) -> Result<ProviderEndpoint, CoordinatorError> {
        let mut providers = self
            .lock_providers(source)
            .ok_or(CoordinatorError::SourceNotConfigured(source))?;

        let Some(index) = self.selector.pick(&providers, prefer_backup, Instant::now()) else {
            warn!("No active provider for {}", source);
            return Err(CoordinatorError::NoActiveProvider { source_id: source });
        };

        let provider = &mut providers[index];
        quota.increment(source, provider);
        Ok(provider.endpoint(source))
    }

    /// A dispatch to this provider succeeded.
    pub fn record_success(&self, source: Source, provider_id: &str) {
        self.with_providers(source, |providers| {
            if let Some(provider) = providers.iter_mut().find(|p| p.config.id == provider_id) {
                provider.consecutive_failures = 0;
            }
        });
    }

    /// A dispatch to this provider failed at the connection level.
    ///
    /// Returns true when the failure put the provider on cooldown.
    pub fn record_failure(
        &self,
        source: Source,
        provider_id: &str,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> bool {
        self.with_providers(source, |providers| {
            let Some(provider) = providers.iter_mut().find(|p| p.config.id == provider_id) else {
                return false;
            };

            provider.consecutive_failures = provider.consecutive_failures.saturating_add(1);
            if failure_threshold > 0 && provider.consecutive_failures >= failure_threshold {
                warn!(
                    "Provider '{}' on {} failed {} times in a row, cooling down for {:?}",
                    provider_id, source, provider.consecutive_failures, cooldown
                );
                provider.consecutive_failures = 0;
                provider.cooldown_until = Some(Instant::now() + cooldown);
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Take a provider out of rotation for `cooldown`.
    pub fn cool_down(&self, source: Source, provider_id: &str, cooldown: Duration) {
        self.with_providers(source, |providers| {
            if let Some(provider) = providers.iter_mut().find(|p| p.config.id == provider_id) {
                warn!(
                    "Provider '{}' on {} deactivated for {:?}",
                    provider_id, source, cooldown
                );
                provider.cooldown_until = Some(Instant::now() + cooldown);
            }
        });
    }

    /// Overwrite a provider's request counter, e.g. with a value persisted
    /// by the caller across restarts. Re-evaluates quota deactivation.
    ///
    /// Returns false if the provider is unknown.
    pub fn set_request_count(&self, source: Source, provider_id: &str, count: u64) -> bool {
        self.with_providers(source, |providers| {
            match providers.iter_mut().find(|p| p.config.id == provider_id) {
                Some(provider) => {
                    provider.request_count = count;
                    provider.quota_exhausted = count >= provider.quota_ceiling();
                    true
                }
                None => false,
            }
        })
        .unwrap_or(false)
    }

    /// Utilization snapshot of every provider of a source.
    pub fn utilization(&self, source: Source) -> Vec<ProviderUtilization> {
        let now = Instant::now();
        self.with_providers(source, |providers| {
            providers.iter().map(|p| p.snapshot(now)).collect()
        })
        .unwrap_or_default()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

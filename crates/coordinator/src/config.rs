//! Coordinator configuration.
//!
//! Loaded from JSON by an external collaborator and validated eagerly: a
//! coordinator is never built from a configuration that fails [`CoordinatorConfig::validate`].
//!
//! ```json
//! {
//!   "baseStaggerMs": 2000,
//!   "sources": [
//!     {
//!       "source": "chain-rpc",
//!       "settings": { "minDelayMs": 250, "maxConcurrent": 2 },
//!       "providers": [
//!         { "id": "alchemy", "baseUrl": "https://eth.example/v2/key", "dailyLimit": 100000, "weight": 10 },
//!         { "id": "public", "baseUrl": "https://rpc.example", "dailyLimit": 10000, "backup": true }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::CoordinatorError;
use crate::models::{ProviderId, Source};

/// Default minimum spacing between two dispatches on a source.
const DEFAULT_MIN_DELAY_MS: u64 = 200;

/// Default number of operations in flight per source.
const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default number of failures before the circuit opens.
const DEFAULT_CB_THRESHOLD: u32 = 5;

/// Default time the circuit stays open before admitting a trial request.
const DEFAULT_CB_TIMEOUT_MS: u64 = 60_000;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_MAX_QUEUE_DEPTH: usize = 1_000;

/// Minimum wait after a rate-limited attempt, regardless of retry count.
const DEFAULT_RATE_LIMIT_COOLDOWN_MS: u64 = 30_000;

/// How long a throttling provider is kept out of rotation.
const DEFAULT_PROVIDER_COOLDOWN_MS: u64 = 5 * 60 * 1_000;

/// Consecutive connection failures before a provider is cooled down.
const DEFAULT_PROVIDER_FAILURE_THRESHOLD: u32 = 5;

const DEFAULT_WEIGHT: u32 = 1;

/// Fraction of the daily limit held back as a safety margin.
const DEFAULT_RATE_LIMIT_BUFFER: f64 = 0.1;

const DEFAULT_BASE_STAGGER_MS: u64 = 2_000;

/// Quota rollover check interval (hourly).
const DEFAULT_QUOTA_CHECK_INTERVAL_SECS: u64 = 60 * 60;

/// Scheduling, retry and circuit settings of one source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceSettings {
    pub min_delay_ms: u64,
    pub max_concurrent: usize,
    pub cb_threshold: u32,
    pub cb_timeout_ms: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_queue_depth: usize,
    pub rate_limit_cooldown_ms: u64,
    pub provider_cooldown_ms: u64,
    pub provider_failure_threshold: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            cb_threshold: DEFAULT_CB_THRESHOLD,
            cb_timeout_ms: DEFAULT_CB_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            rate_limit_cooldown_ms: DEFAULT_RATE_LIMIT_COOLDOWN_MS,
            provider_cooldown_ms: DEFAULT_PROVIDER_COOLDOWN_MS,
            provider_failure_threshold: DEFAULT_PROVIDER_FAILURE_THRESHOLD,
        }
    }
}

impl SourceSettings {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn cb_timeout(&self) -> Duration {
        Duration::from_millis(self.cb_timeout_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    pub fn provider_cooldown(&self) -> Duration {
        Duration::from_millis(self.provider_cooldown_ms)
    }
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_rate_limit_buffer() -> f64 {
    DEFAULT_RATE_LIMIT_BUFFER
}

/// Static configuration of one provider (endpoint/credential pair).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub base_url: String,
    /// Static preference, only consulted when utilization is tied.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Requests allowed per rolling day.
    pub daily_limit: u64,
    /// Fraction of `daily_limit` kept in reserve; the provider is deactivated at
    /// `daily_limit * (1 - rate_limit_buffer)` requests.
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: f64,
    /// Non-primary provider, preferred while the source's circuit is probing.
    #[serde(default)]
    pub backup: bool,
}

impl ProviderConfig {
    /// Convenience constructor with default weight and buffer.
    pub fn new(id: impl Into<ProviderId>, base_url: impl Into<String>, daily_limit: u64) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            weight: DEFAULT_WEIGHT,
            daily_limit,
            rate_limit_buffer: DEFAULT_RATE_LIMIT_BUFFER,
            backup: false,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_buffer(mut self, rate_limit_buffer: f64) -> Self {
        self.rate_limit_buffer = rate_limit_buffer;
        self
    }

    pub fn as_backup(mut self) -> Self {
        self.backup = true;
        self
    }
}

/// One source with its settings and providers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub source: Source,
    #[serde(default)]
    pub settings: SourceSettings,
    pub providers: Vec<ProviderConfig>,
}

impl SourceConfig {
    pub fn new(source: Source, settings: SourceSettings, providers: Vec<ProviderConfig>) -> Self {
        Self {
            source,
            settings,
            providers,
        }
    }
}

fn default_base_stagger_ms() -> u64 {
    DEFAULT_BASE_STAGGER_MS
}

fn default_quota_check_interval_secs() -> u64 {
    DEFAULT_QUOTA_CHECK_INTERVAL_SECS
}

/// Complete coordinator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorConfig {
    pub sources: Vec<SourceConfig>,
    /// Per-worker startup stagger unit.
    #[serde(default = "default_base_stagger_ms")]
    pub base_stagger_ms: u64,
    /// Interval of the background quota rollover check.
    #[serde(default = "default_quota_check_interval_secs")]
    pub quota_check_interval_secs: u64,
}

impl CoordinatorConfig {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources,
            base_stagger_ms: DEFAULT_BASE_STAGGER_MS,
            quota_check_interval_secs: DEFAULT_QUOTA_CHECK_INTERVAL_SECS,
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, CoordinatorError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CoordinatorError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CoordinatorError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn base_stagger(&self) -> Duration {
        Duration::from_millis(self.base_stagger_ms)
    }

    pub fn quota_check_interval(&self) -> Duration {
        Duration::from_secs(self.quota_check_interval_secs)
    }

    pub fn source(&self, source: Source) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source == source)
    }

    /// Startup validation. A source without providers is fatal here, before
    /// any request can be accepted.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.sources.is_empty() {
            return Err(invalid("no sources configured".to_string()));
        }
        if self.quota_check_interval_secs == 0 {
            return Err(invalid("quotaCheckIntervalSecs must be positive".to_string()));
        }

        let mut seen_sources = HashSet::new();
        for source_config in &self.sources {
            let source = source_config.source;
            if !seen_sources.insert(source) {
                return Err(invalid(format!("source {} configured twice", source)));
            }

            let settings = &source_config.settings;
            if settings.max_concurrent == 0 {
                return Err(invalid(format!("{}: maxConcurrent must be positive", source)));
            }
            if settings.max_queue_depth == 0 {
                return Err(invalid(format!("{}: maxQueueDepth must be positive", source)));
            }
            if settings.cb_threshold == 0 {
                return Err(invalid(format!("{}: cbThreshold must be positive", source)));
            }
            if settings.base_backoff_ms > settings.max_backoff_ms {
                return Err(invalid(format!(
                    "{}: baseBackoffMs ({}) exceeds maxBackoffMs ({})",
                    source, settings.base_backoff_ms, settings.max_backoff_ms
                )));
            }

            if source_config.providers.is_empty() {
                return Err(invalid(format!("{} has no providers", source)));
            }

            let mut seen_providers = HashSet::new();
            for provider in &source_config.providers {
                if !seen_providers.insert(provider.id.as_ref()) {
                    return Err(invalid(format!(
                        "{}: provider '{}' registered twice",
                        source, provider.id
                    )));
                }
                if provider.daily_limit == 0 {
                    return Err(invalid(format!(
                        "{}: provider '{}' has a zero daily limit",
                        source, provider.id
                    )));
                }
                if !(0.0..1.0).contains(&provider.rate_limit_buffer) {
                    return Err(invalid(format!(
                        "{}: provider '{}' rateLimitBuffer must be in [0, 1)",
                        source, provider.id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> CoordinatorError {
    CoordinatorError::InvalidConfig(message)
}

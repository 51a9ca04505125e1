//! Daily quota tracking.
//!
//! Counts dispatches per provider against its buffered daily ceiling and
//! resets every provider of a source once 24 hours have passed since that
//! source's last reset.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};

use super::provider_registry::{ProviderRegistry, ProviderState};
use crate::models::Source;

/// Length of a quota period.
const ROLLOVER_HOURS: i64 = 24;

/// Per-source daily quota bookkeeping.
pub struct QuotaTracker {
    last_reset: Mutex<HashMap<Source, DateTime<Utc>>>,
}

impl QuotaTracker {
    /// Start a quota period for every source at `now`.
    pub fn new(sources: &[Source], now: DateTime<Utc>) -> Self {
        Self {
            last_reset: Mutex::new(sources.iter().map(|&s| (s, now)).collect()),
        }
    }

    fn lock_last_reset(&self) -> MutexGuard<'_, HashMap<Source, DateTime<Utc>>> {
        self.last_reset.lock().unwrap_or_else(|poisoned| {
            warn!("Quota tracker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Count one dispatch. Deactivates the provider when it crosses its
    /// buffered ceiling; returns true on that crossing.
    pub fn increment(&self, source: Source, provider: &mut ProviderState) -> bool {
        provider.request_count = provider.request_count.saturating_add(1);

        if !provider.quota_exhausted && provider.request_count >= provider.quota_ceiling() {
            provider.quota_exhausted = true;
            warn!(
                "Provider '{}' on {} reached {}/{} requests, deactivated until daily rollover",
                provider.config.id, source, provider.request_count, provider.config.daily_limit
            );
            return true;
        }

        false
    }

    /// When the current quota period of a source started.
    pub fn last_reset(&self, source: Source) -> Option<DateTime<Utc>> {
        self.lock_last_reset().get(&source).copied()
    }

    /// Reset every source whose period is at least 24 hours old.
    ///
    /// Request counters go back to zero and quota deactivation is lifted.
    /// Cooldowns from throttling or connection failures are left alone.
    /// Returns the sources that rolled over.
    pub fn check_rollover(&self, registry: &ProviderRegistry, now: DateTime<Utc>) -> Vec<Source> {
        let period = ChronoDuration::hours(ROLLOVER_HOURS);
        let mut last_reset = self.lock_last_reset();
        let mut rolled = Vec::new();

        for (source, reset_at) in last_reset.iter_mut() {
            if now.signed_duration_since(*reset_at) < period {
                debug!("Quota period for {} started at {}, no rollover", source, reset_at);
                continue;
            }

            registry.with_providers(*source, |providers| {
                for provider in providers.iter_mut() {
                    provider.request_count = 0;
                    provider.quota_exhausted = false;
                }
            });

            info!("Daily quota rollover for {}", source);
            *reset_at = now;
            rolled.push(*source);
        }

        rolled.sort();
        rolled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use std::time::Duration;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderConfig::new("small", "https://small.example", 10).with_buffer(0.2),
                Source::PriceFeed,
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_increment_deactivates_at_buffered_ceiling() {
        let registry = registry();
        let quota = QuotaTracker::new(&registry.sources(), Utc::now());

        // ceiling = 10 * (1 - 0.2) = 8
        for _ in 0..7 {
            registry.checkout(Source::PriceFeed, false, &quota).unwrap();
        }
        assert!(registry.utilization(Source::PriceFeed)[0].is_active);

        registry.checkout(Source::PriceFeed, false, &quota).unwrap();
        let state = &registry.utilization(Source::PriceFeed)[0];
        assert_eq!(state.request_count, 8);
        assert!(state.quota_exhausted);
        assert!(!state.is_active);
    }

    #[test]
    fn test_rollover_restores_provider() {
        let registry = registry();
        let start = Utc::now();
        let quota = QuotaTracker::new(&registry.sources(), start);
        registry.set_request_count(Source::PriceFeed, "small", 9);
        assert!(!registry.utilization(Source::PriceFeed)[0].is_active);

        // Not yet a full day
        let rolled = quota.check_rollover(&registry, start + ChronoDuration::hours(23));
        assert!(rolled.is_empty());
        assert!(!registry.utilization(Source::PriceFeed)[0].is_active);

        let next_day = start + ChronoDuration::hours(24);
        let rolled = quota.check_rollover(&registry, next_day);
        assert_eq!(rolled, vec![Source::PriceFeed]);
        assert_eq!(quota.last_reset(Source::PriceFeed), Some(next_day));

        let state = &registry.utilization(Source::PriceFeed)[0];
        assert_eq!(state.request_count, 0);
        assert!(state.is_active);
    }

    #[test]
    fn test_rollover_keeps_cooldowns() {
        let registry = registry();
        let start = Utc::now();
        let quota = QuotaTracker::new(&registry.sources(), start);
        registry.set_request_count(Source::PriceFeed, "small", 9);
        registry.cool_down(Source::PriceFeed, "small", Duration::from_secs(3600));

        quota.check_rollover(&registry, start + ChronoDuration::hours(25));

        let state = &registry.utilization(Source::PriceFeed)[0];
        assert_eq!(state.request_count, 0);
        assert!(!state.quota_exhausted);
        assert!(state.cooling_down);
        assert!(!state.is_active);
    }
}

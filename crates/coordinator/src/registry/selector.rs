//! Provider selection.
//!
//! Picks the least-utilized active provider of a source. Static weight only
//! breaks ties; while the source's circuit is probing recovery, active backup
//! providers are preferred over primaries.

use std::cmp::Ordering;

use tokio::time::Instant;

use super::provider_registry::ProviderState;

/// Stateless selection policy over a source's providers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProviderSelector;

impl ProviderSelector {
    pub fn new() -> Self {
        Self
    }

    /// Index of the provider to dispatch to, or `None` when none is active.
    ///
    /// Ordering:
    /// 1. Only active providers (quota not exhausted, no pending cooldown)
    /// 2. Backup providers only, if `prefer_backup` and at least one is active
    /// 3. Lowest `request_count / daily_limit`
    /// 4. Higher weight
    /// 5. Registration order
    pub fn pick(&self, providers: &[ProviderState], prefer_backup: bool, now: Instant) -> Option<usize> {
        let active: Vec<usize> = providers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_active(now))
            .map(|(i, _)| i)
            .collect();

        let backups: Vec<usize> = active
            .iter()
            .copied()
            .filter(|&i| providers[i].config.backup)
            .collect();

        let candidates = if prefer_backup && !backups.is_empty() {
            backups
        } else {
            active
        };

        candidates.into_iter().min_by(|&a, &b| {
            let (pa, pb) = (&providers[a], &providers[b]);
            pa.utilization()
                .partial_cmp(&pb.utilization())
                .unwrap_or(Ordering::Equal)
                .then_with(|| pb.config.weight.cmp(&pa.config.weight))
                .then_with(|| a.cmp(&b))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use std::time::Duration;

    fn state(config: ProviderConfig, request_count: u64) -> ProviderState {
        let mut state = ProviderState::new(config);
        state.request_count = request_count;
        state
    }

    #[test]
    fn test_least_utilized_wins_over_weight() {
        let providers = vec![
            state(
                ProviderConfig::new("P1", "https://p1.example", 100_000).with_weight(10),
                50_000,
            ),
            state(
                ProviderConfig::new("P2", "https://p2.example", 10_000).with_weight(5),
                1_000,
            ),
        ];

        let picked = ProviderSelector::new().pick(&providers, false, Instant::now());
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn test_weight_breaks_ties() {
        let providers = vec![
            state(ProviderConfig::new("light", "https://a.example", 100).with_weight(1), 0),
            state(ProviderConfig::new("heavy", "https://b.example", 100).with_weight(9), 0),
        ];

        let picked = ProviderSelector::new().pick(&providers, false, Instant::now());
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn test_registration_order_breaks_full_ties() {
        let providers = vec![
            state(ProviderConfig::new("first", "https://a.example", 100), 0),
            state(ProviderConfig::new("second", "https://b.example", 100), 0),
        ];

        let picked = ProviderSelector::new().pick(&providers, false, Instant::now());
        assert_eq!(picked, Some(0));
    }

    #[test]
    fn test_inactive_providers_are_skipped() {
        let now = Instant::now();
        let mut exhausted = state(ProviderConfig::new("exhausted", "https://a.example", 100), 95);
        exhausted.quota_exhausted = true;
        let mut cooling = state(ProviderConfig::new("cooling", "https://b.example", 100), 0);
        cooling.cooldown_until = Some(now + Duration::from_secs(60));
        let fresh = state(ProviderConfig::new("fresh", "https://c.example", 100), 50);

        let providers = vec![exhausted, cooling, fresh];
        assert_eq!(ProviderSelector::new().pick(&providers, false, now), Some(2));
    }

    #[test]
    fn test_no_active_provider() {
        let mut only = state(ProviderConfig::new("only", "https://a.example", 100), 0);
        only.quota_exhausted = true;

        assert_eq!(ProviderSelector::new().pick(&[only], false, Instant::now()), None);
    }

    #[test]
    fn test_backup_preferred_while_probing() {
        let providers = vec![
            state(ProviderConfig::new("primary", "https://a.example", 100), 0),
            state(ProviderConfig::new("backup", "https://b.example", 100).as_backup(), 80),
        ];
        let now = Instant::now();

        assert_eq!(ProviderSelector::new().pick(&providers, false, now), Some(0));
        assert_eq!(ProviderSelector::new().pick(&providers, true, now), Some(1));
    }

    #[test]
    fn test_prefer_backup_falls_back_to_primaries() {
        let mut backup = state(ProviderConfig::new("backup", "https://b.example", 100).as_backup(), 0);
        backup.quota_exhausted = true;
        let providers = vec![
            state(ProviderConfig::new("primary", "https://a.example", 100), 10),
            backup,
        ];

        assert_eq!(ProviderSelector::new().pick(&providers, true, Instant::now()), Some(0));
    }
}

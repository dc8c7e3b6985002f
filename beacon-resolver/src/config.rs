//! Resolver tuning knobs.

use beacon_core::RelayName;
use std::time::Duration;

/// Timeouts, TTLs, and relay pools steering resolution.
///
/// The defaults encode the latency contract: a cold resolve never takes
/// longer than `race_ceiling`, and once one relay has answered, at most
/// `race_grace` more is spent collecting extra holders.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Hard ceiling on one resolution's relay race.
    pub race_ceiling: Duration,
    /// After the first record arrives, how long stragglers may still report
    /// that they hold it.
    pub race_grace: Duration,
    /// Budget for the author-outbox sub-resolution.
    pub outbox_timeout: Duration,
    /// Budget for collecting an author feed across relays.
    pub feed_timeout: Duration,
    /// Sliding expiration for directly requested records.
    pub direct_ttl: Duration,
    /// Shorter expiration for records fetched in bulk (feeds).
    pub secondary_ttl: Duration,
    /// How long a discovered outbox relay list stays cached.
    pub outbox_ttl: Duration,
    /// Candidate lists are padded with random general-pool relays until they
    /// reach this many distinct entries.
    pub min_candidates: usize,
    /// At most this many outbox relays join one candidate list.
    pub max_outbox_hints: usize,
    /// Upper bound on requested feed sizes.
    pub feed_limit: usize,
    /// Fallback relays for subject and entity pointers.
    pub general_pool: Vec<RelayName>,
    /// Relays favored for author profile lookups.
    pub profile_pool: Vec<RelayName>,
    /// Relays favored for bare record id lookups.
    pub id_pool: Vec<RelayName>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            race_ceiling: Duration::from_millis(7500),
            race_grace: Duration::from_millis(1000),
            outbox_timeout: Duration::from_millis(1500),
            feed_timeout: Duration::from_millis(4000),
            direct_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            secondary_ttl: Duration::from_secs(24 * 60 * 60),
            outbox_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            min_candidates: 5,
            max_outbox_hints: 5,
            feed_limit: 20,
            general_pool: pool(&[
                "relay.dispatch.zone",
                "archive.beacon.network",
                "open.recordhub.io",
            ]),
            profile_pool: pool(&["profiles.beacon.network", "directory.recordhub.io"]),
            id_pool: pool(&["archive.beacon.network", "relay.dispatch.zone"]),
        }
    }
}

fn pool(names: &[&str]) -> Vec<RelayName> {
    names.iter().filter_map(|name| RelayName::parse(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pools_parse() {
        let config = ResolverConfig::default();
        assert_eq!(config.general_pool.len(), 3);
        assert_eq!(config.profile_pool.len(), 2);
        assert_eq!(config.id_pool.len(), 2);
        assert!(config.race_grace < config.race_ceiling);
    }
}

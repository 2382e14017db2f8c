//! Politeness controller
//!
//! Enforces the per-source request interval (`60 / rate_limit_per_minute`
//! seconds between granted requests) and robots.txt compliance.
//!
//! Slots are kept per source in a concurrent map. Reserving a slot only holds
//! the map shard for the source while computing the next grant time; the wait
//! itself happens outside any lock, so sources never contend with each other.

use crate::crawler::Fetcher;
use crate::robots::{fetch_robots, SessionRobots};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Result of a robots.txt check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsVerdict {
    Allowed,
    Disallowed,
}

/// Per-source interval gate plus robots.txt checks
#[derive(Debug, Default)]
pub struct PolitenessController {
    /// Time of the last granted slot per source
    slots: DashMap<String, Instant>,
}

impl PolitenessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `interval` has passed since the source's last granted slot
    ///
    /// The slot is reserved before sleeping, so two callers for the same
    /// source are spaced by `interval` even if they race.
    ///
    /// # Arguments
    ///
    /// * `source_id` - The source requesting a slot
    /// * `interval` - Minimum spacing between granted slots for this source
    pub async fn acquire(&self, source_id: &str, interval: Duration) {
        let now = Instant::now();
        let granted = match self.slots.entry(source_id.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = (*slot.get() + interval).max(now);
                slot.insert(next);
                next
            }
            Entry::Vacant(slot) => *slot.insert(now),
        };

        if granted > now {
            tracing::trace!(
                "Politeness wait of {:?} for source {}",
                granted - now,
                source_id
            );
            tokio::time::sleep_until(granted).await;
        }
    }

    /// Checks `url` against robots.txt, fetching it once per origin per session
    ///
    /// # Arguments
    ///
    /// * `robots` - The session's robots cache
    /// * `fetcher` - Fetcher used for the robots.txt request on a cache miss
    /// * `url` - The URL about to be fetched
    /// * `timeout` - Timeout for the robots.txt request
    pub async fn check_robots(
        &self,
        robots: &mut SessionRobots,
        fetcher: &dyn Fetcher,
        url: &Url,
        timeout: Duration,
    ) -> RobotsVerdict {
        if robots.get(url).is_none() {
            let parsed = fetch_robots(fetcher, url, timeout).await;
            robots.insert(url, parsed);
        }

        match robots.is_allowed(url) {
            Some(false) => RobotsVerdict::Disallowed,
            _ => RobotsVerdict::Allowed,
        }
    }
}

/// Interval actually enforced for a session
///
/// A robots.txt `Crawl-delay` longer than the configured interval widens it;
/// a shorter one never narrows it.
pub fn effective_interval(configured: Duration, crawl_delay: Option<Duration>) -> Duration {
    match crawl_delay {
        Some(delay) if delay > configured => delay,
        _ => configured,
    }
}

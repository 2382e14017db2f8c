//! Per-session robots.txt cache
//!
//! Each crawl session fetches a host's robots.txt at most once and keeps the
//! parsed rules until the session ends.

use crate::robots::ParsedRobots;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Robots rules fetched during one session, keyed by origin
#[derive(Debug, Clone)]
pub struct SessionRobots {
    agent: String,
    hosts: HashMap<String, ParsedRobots>,
}

impl SessionRobots {
    /// Creates an empty cache matching rules against `agent`
    ///
    /// `agent` is the crawler's product token (e.g. `SumiHarvest`), not the
    /// full User-Agent header.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            hosts: HashMap::new(),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Rules for the origin of `url`, if already fetched this session
    pub fn get(&self, url: &Url) -> Option<&ParsedRobots> {
        self.hosts.get(&origin_key(url))
    }

    pub fn insert(&mut self, url: &Url, robots: ParsedRobots) {
        self.hosts.insert(origin_key(url), robots);
    }

    /// Number of origins fetched so far
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Checks `url` against the cached rules of its origin
    ///
    /// Returns `None` if the origin has not been fetched yet.
    pub fn is_allowed(&self, url: &Url) -> Option<bool> {
        self.get(url)
            .map(|robots| robots.is_allowed(url.as_str(), &self.agent))
    }

    /// Crawl-delay of the origin of `url`
    pub fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.get(url).and_then(|robots| robots.crawl_delay(&self.agent))
    }
}

/// `scheme://host:port`, so http and https origins are cached separately
fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

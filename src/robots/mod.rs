//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! Fetching goes through the crawler's [`Fetcher`] so it shares the session's
//! timeout and client.

mod cache;
mod parser;

pub use cache::SessionRobots;
pub use parser::ParsedRobots;

use crate::crawler::Fetcher;
use std::time::Duration;
use url::Url;

/// Location of the robots.txt governing `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    url.host_str()?;
    url.join("/robots.txt").ok()
}

/// Fetches robots.txt for the origin of `url`
///
/// A robots.txt that cannot be fetched (transport error, any non-2xx status)
/// places no restrictions on the crawl.
///
/// # Arguments
///
/// * `fetcher` - The fetcher used for the crawl itself
/// * `url` - Any URL on the origin
/// * `timeout` - Per-fetch timeout
pub async fn fetch_robots(fetcher: &dyn Fetcher, url: &Url, timeout: Duration) -> ParsedRobots {
    let Some(location) = robots_url(url) else {
        return ParsedRobots::allow_all();
    };

    let response = fetcher.fetch(&location, timeout).await;
    match response.body {
        Some(body) if response.outcome.is_2xx() => {
            ParsedRobots::from_content(&String::from_utf8_lossy(&body))
        }
        _ => {
            tracing::debug!(
                "No usable robots.txt at {} ({:?}), allowing all",
                location,
                response.outcome.http_status
            );
            ParsedRobots::allow_all()
        }
    }
}

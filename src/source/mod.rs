//! Source model
//!
//! A source is a configured remote origin with its own schedule and limits.
//! The configuration half lives here; the mutable runtime half (status,
//! failure counters, hits) lives in [`crate::state::SourceCell`].

mod registry;

pub use registry::{MemoryRegistry, SourceRegistry};

use crate::config::{RetryPolicyEntry, SourceEntry};
use crate::cron::CronExpr;
use crate::ConfigError;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Declared content format of a source
///
/// The core never looks inside a format; the content type only selects the
/// parser and enumerator the collaborators provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Html,
    Rss,
    Pdf,
    Txt,
    Twitter,
    Reddit,
    Youtube,
    Linkedin,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Rss => "rss",
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Twitter => "twitter",
            Self::Reddit => "reddit",
            Self::Youtube => "youtube",
            Self::Linkedin => "linkedin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Some(Self::Html),
            "rss" => Some(Self::Rss),
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Txt),
            "twitter" => Some(Self::Twitter),
            "reddit" => Some(Self::Reddit),
            "youtube" => Some(Self::Youtube),
            "linkedin" => Some(Self::Linkedin),
            _ => None,
        }
    }

    /// Social platforms are paged through their APIs rather than by links
    pub fn is_social(&self) -> bool {
        matches!(
            self,
            Self::Twitter | Self::Reddit | Self::Youtube | Self::Linkedin
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry settings for transient fetch failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicyConfig {
    /// Retries allowed per item after the first attempt
    pub max_retries: u32,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Per-fetch timeout
    pub timeout: Duration,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RetryPolicyEntry> for RetryPolicyConfig {
    fn from(entry: &RetryPolicyEntry) -> Self {
        Self {
            max_retries: entry.max_retries,
            backoff_factor: entry.backoff_factor,
            timeout: Duration::from_secs(entry.timeout_secs),
            base_delay: Duration::from_millis(entry.base_delay_ms),
        }
    }
}

/// Crawl configuration of a source
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub frequency: CronExpr,
    pub rate_limit_per_minute: u32,
    pub max_hits: u32,
    pub follow_links: bool,
    pub respect_robots: bool,
    pub enabled: bool,
    pub retry_policy: RetryPolicyConfig,
}

impl CrawlConfig {
    /// Minimum spacing between two granted requests for this source
    pub fn request_interval(&self) -> Duration {
        interval_for_rate(self.rate_limit_per_minute)
    }
}

/// Converts a requests-per-minute limit into the spacing between requests
pub fn interval_for_rate(rate_limit_per_minute: u32) -> Duration {
    Duration::from_secs_f64(60.0 / rate_limit_per_minute.max(1) as f64)
}

/// A configured remote origin to crawl
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: Url,
    pub content_type: ContentType,
    pub config: CrawlConfig,
}

impl Source {
    /// Builds a source from a validated configuration entry
    pub fn from_entry(entry: &SourceEntry) -> Result<Self, ConfigError> {
        let url = Url::parse(&entry.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid url for source '{}': {}", entry.id, e))
        })?;

        let content_type = ContentType::parse(&entry.content_type).ok_or_else(|| {
            ConfigError::Validation(format!(
                "Unknown content-type '{}' for source '{}'",
                entry.content_type, entry.id
            ))
        })?;

        let frequency =
            CronExpr::parse(&entry.frequency).map_err(|error| ConfigError::InvalidCron {
                source_id: entry.id.clone(),
                error,
            })?;

        Ok(Self {
            id: entry.id.clone(),
            name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
            url,
            content_type,
            config: CrawlConfig {
                frequency,
                rate_limit_per_minute: entry.rate_limit_per_minute,
                max_hits: entry.max_hits,
                follow_links: entry.follow_links,
                respect_robots: entry.respect_robots,
                enabled: entry.enabled,
                retry_policy: RetryPolicyConfig::from(&entry.retry_policy),
            },
        })
    }
}

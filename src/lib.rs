//! Sumi-Harvest: a polite, schedule-driven content harvester
//!
//! This crate implements the crawl orchestration core: the cron scheduler that
//! triggers per-source jobs, the crawl manager that runs bounded sessions on a
//! fixed worker pool, the politeness controller, the retry policy and the
//! blocking-detection state machine.

pub mod blocking;
pub mod config;
pub mod crawler;
pub mod cron;
pub mod output;
pub mod politeness;
pub mod retry;
pub mod robots;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transient fetch error for {url}: {reason}")]
    TransientFetch { url: String, reason: String },

    #[error("Source {source_id} is blocked: {reason}")]
    Blocked { source_id: String, reason: String },

    #[error("URL disallowed by robots.txt: {url}")]
    DisallowedByRobots { url: String },

    #[error("A crawl session is already running for source {source_id}")]
    AlreadyRunning { source_id: String },

    #[error("No resumable session for source {source_id}")]
    NoSuchSession { source_id: String },

    #[error("Session for source {source_id} failed after {failures} consecutive item failures")]
    SessionFailed { source_id: String, failures: u32 },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Job queue is full, cannot enqueue source {source_id}")]
    QueueFull { source_id: String },

    #[error("Invalid status transition for {source_id}: {from} -> {to}")]
    InvalidTransition {
        source_id: String,
        from: state::SourceStatus,
        to: state::SourceStatus,
    },

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid cron expression for source '{source_id}': {error}")]
    InvalidCron {
        source_id: String,
        error: cron::CronError,
    },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::CrawlManager;
pub use scheduler::Scheduler;
pub use source::{ContentType, CrawlConfig, RetryPolicyConfig, Source};
pub use state::{EndReason, SourceStatus};
pub use url::{extract_host, normalize_url};

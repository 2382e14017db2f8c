use serde::Deserialize;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
}

/// Worker pool, scheduler and session limits shared by every source
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of crawl sessions that may run at once across all sources
    #[serde(rename = "max-workers", default = "default_max_workers")]
    pub max_workers: u32,

    /// Capacity of the job queue in front of the worker pool
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: u32,

    /// Seconds between two scheduler evaluations
    #[serde(rename = "tick-interval-secs", default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Consecutive item failures tolerated before a session fails
    #[serde(rename = "failure-ceiling", default = "default_failure_ceiling")]
    pub failure_ceiling: u32,

    /// Block suspicions needed before a source is marked blocked
    #[serde(rename = "block-threshold", default = "default_block_threshold")]
    pub block_threshold: u32,

    /// Ceiling on any single retry backoff
    #[serde(rename = "max-backoff-secs", default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Largest response body a fetch will read
    #[serde(rename = "max-body-bytes", default = "default_max_body")]
    pub max_body_bytes: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            tick_interval_secs: default_tick_interval(),
            failure_ceiling: default_failure_ceiling(),
            block_threshold: default_block_threshold(),
            max_backoff_secs: default_max_backoff(),
            max_body_bytes: default_max_body(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One `[[source]]` table
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub url: String,

    /// html, rss, pdf, txt, twitter, reddit, youtube or linkedin
    #[serde(rename = "content-type", default = "default_content_type")]
    pub content_type: String,

    /// 5-field cron expression
    #[serde(default = "default_frequency")]
    pub frequency: String,

    #[serde(rename = "rate-limit-per-minute", default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    #[serde(rename = "max-hits", default = "default_max_hits")]
    pub max_hits: u32,

    #[serde(rename = "follow-links", default)]
    pub follow_links: bool,

    #[serde(rename = "respect-robots", default = "default_true")]
    pub respect_robots: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "retry-policy", default)]
    pub retry_policy: RetryPolicyEntry,
}

/// `[source.retry-policy]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicyEntry {
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(rename = "backoff-factor", default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Per-fetch timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_timeout")]
    pub timeout_secs: u64,

    /// Delay before the first retry in milliseconds
    #[serde(rename = "base-delay-ms", default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for RetryPolicyEntry {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            timeout_secs: default_timeout(),
            base_delay_ms: default_base_delay(),
        }
    }
}

fn default_max_workers() -> u32 {
    5
}

fn default_queue_capacity() -> u32 {
    256
}

fn default_tick_interval() -> u64 {
    60
}

fn default_failure_ceiling() -> u32 {
    5
}

fn default_block_threshold() -> u32 {
    3
}

fn default_max_backoff() -> u64 {
    300
}

fn default_max_body() -> u64 {
    10 * 1024 * 1024
}

fn default_content_type() -> String {
    "html".to_string()
}

fn default_frequency() -> String {
    "0 0 * * *".to_string()
}

fn default_rate_limit() -> u32 {
    30
}

fn default_max_hits() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_timeout() -> u64 {
    30
}

fn default_base_delay() -> u64 {
    1000
}

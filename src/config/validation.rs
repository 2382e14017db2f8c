use crate::config::types::{
    Config, OrchestratorConfig, OutputConfig, RetryPolicyEntry, SourceEntry, UserAgentConfig,
};
use crate::cron::CronExpr;
use crate::source::ContentType;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_orchestrator_config(&config.orchestrator)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates worker pool and session limits
fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.max_workers < 1 || config.max_workers > 64 {
        return Err(ConfigError::Validation(format!(
            "max_workers must be between 1 and 64, got {}",
            config.max_workers
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "queue_capacity must be >= 1, got {}",
            config.queue_capacity
        )));
    }

    if config.tick_interval_secs < 1 || config.tick_interval_secs > 60 {
        return Err(ConfigError::Validation(format!(
            "tick_interval_secs must be between 1 and 60, got {}",
            config.tick_interval_secs
        )));
    }

    if config.failure_ceiling < 1 {
        return Err(ConfigError::Validation(format!(
            "failure_ceiling must be >= 1, got {}",
            config.failure_ceiling
        )));
    }

    if config.block_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "block_threshold must be >= 1, got {}",
            config.block_threshold
        )));
    }

    if config.max_backoff_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "max_backoff_secs must be >= 1, got {}",
            config.max_backoff_secs
        )));
    }

    if config.max_body_bytes < 1 {
        return Err(ConfigError::Validation(format!(
            "max_body_bytes must be >= 1, got {}",
            config.max_body_bytes
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates every source entry and the uniqueness of their ids
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in sources {
        validate_source_id(&entry.id)?;

        if !seen.insert(entry.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source id '{}'",
                entry.id
            )));
        }

        validate_source(entry)?;
    }

    Ok(())
}

/// Validates a single source entry
fn validate_source(entry: &SourceEntry) -> Result<(), ConfigError> {
    let url = Url::parse(&entry.url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid url '{}' for source '{}': {}", entry.url, entry.id, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Source '{}' url must use http or https, got '{}'",
            entry.id,
            url.scheme()
        )));
    }

    if ContentType::parse(&entry.content_type).is_none() {
        return Err(ConfigError::Validation(format!(
            "Unknown content-type '{}' for source '{}'",
            entry.content_type, entry.id
        )));
    }

    CronExpr::parse(&entry.frequency).map_err(|error| ConfigError::InvalidCron {
        source_id: entry.id.clone(),
        error,
    })?;

    if entry.rate_limit_per_minute < 1 || entry.rate_limit_per_minute > 300 {
        return Err(ConfigError::Validation(format!(
            "rate_limit_per_minute for source '{}' must be between 1 and 300, got {}",
            entry.id, entry.rate_limit_per_minute
        )));
    }

    if entry.max_hits < 1 || entry.max_hits > 10_000 {
        return Err(ConfigError::Validation(format!(
            "max_hits for source '{}' must be between 1 and 10000, got {}",
            entry.id, entry.max_hits
        )));
    }

    validate_retry_policy(&entry.id, &entry.retry_policy)
}

/// Validates a source's retry policy
fn validate_retry_policy(source_id: &str, policy: &RetryPolicyEntry) -> Result<(), ConfigError> {
    if policy.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries for source '{}' must be <= 10, got {}",
            source_id, policy.max_retries
        )));
    }

    if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff_factor for source '{}' must be >= 1.0, got {}",
            source_id, policy.backoff_factor
        )));
    }

    if policy.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs for source '{}' must be >= 1, got {}",
            source_id, policy.timeout_secs
        )));
    }

    Ok(())
}

/// Source ids are used as database keys and log fields
fn validate_source_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation(
            "source id cannot be empty".to_string(),
        ));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "source id '{}' must contain only ASCII letters, digits, '-' and '_'",
            id
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => {
            return Err(ConfigError::Validation(format!(
                "Invalid email format: '{}'",
                email
            )))
        }
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

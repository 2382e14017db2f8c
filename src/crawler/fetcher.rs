//! Fetcher contract and the reqwest-backed HTTP implementation
//!
//! A fetch never fails in the `Result` sense: every non-2xx response and every
//! transport failure is reported as a [`FetchOutcome`] so the session can feed
//! it to the blocking detector and the retry policy.

use crate::config::UserAgentConfig;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Response};
use std::time::{Duration, Instant};
use url::Url;

/// Upper bound on how much of a body is kept as its signature
const SIGNATURE_LIMIT: usize = 16 * 1024;

/// Default cap on a response body
pub const DEFAULT_MAX_BODY: u64 = 10 * 1024 * 1024;

/// Coarse classification of a single fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    TransientError,
    Blocked,
    TerminalError,
}

impl StatusClass {
    /// Classifies an HTTP status code
    ///
    /// | Status | Class |
    /// |--------|-------|
    /// | 2xx | Success |
    /// | 403, 429 | Blocked |
    /// | 408, 5xx | TransientError |
    /// | anything else | TerminalError |
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            403 | 429 => Self::Blocked,
            408 | 500..=599 => Self::TransientError,
            _ => Self::TerminalError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientError => "transient_error",
            Self::Blocked => "blocked",
            Self::TerminalError => "terminal_error",
        }
    }
}

/// Result of one network attempt
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub status_class: StatusClass,
    pub http_status: Option<u16>,
    pub elapsed: Duration,
    /// Leading slice of the body text, used by block classifiers
    pub body_signature: Option<String>,
}

impl FetchOutcome {
    /// Outcome for a response that carried an HTTP status
    pub fn from_status(status: u16, elapsed: Duration, body: Option<&[u8]>) -> Self {
        Self {
            status_class: StatusClass::from_status(status),
            http_status: Some(status),
            elapsed,
            body_signature: body.map(body_signature),
        }
    }

    /// Outcome for a request that produced no response (timeout, refused, ...)
    pub fn transport(status_class: StatusClass, elapsed: Duration) -> Self {
        Self {
            status_class,
            http_status: None,
            elapsed,
            body_signature: None,
        }
    }

    /// Returns true if the origin answered with a 2xx status
    pub fn is_2xx(&self) -> bool {
        matches!(self.http_status, Some(200..=299))
    }
}

/// Everything a fetch produced
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub outcome: FetchOutcome,
    /// Raw body, present for any response the origin sent
    pub body: Option<Vec<u8>>,
    /// URL after redirects
    pub final_url: Option<Url>,
}

impl FetchResponse {
    /// A response with no body, e.g. a transport failure
    pub fn bare(outcome: FetchOutcome) -> Self {
        Self {
            outcome,
            body: None,
            final_url: None,
        }
    }
}

/// Capability-abstracted network access
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, giving up after `timeout`
    async fn fetch(&self, url: &Url, timeout: Duration) -> FetchResponse;
}

/// Builds the text signature of a body
pub fn body_signature(body: &[u8]) -> String {
    let end = body.len().min(SIGNATURE_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_harvest::config::UserAgentConfig;
/// use sumi_harvest::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiHarvest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/bot".to_string(),
///     contact_email: "bot@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body: u64,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            max_body: DEFAULT_MAX_BODY,
        })
    }

    /// Bodies larger than `limit` bytes are dropped and the fetch fails
    pub fn with_max_body(mut self, limit: u64) -> Self {
        self.max_body = limit;
        self
    }

    /// Reads the body chunk by chunk, giving up once it passes the cap
    async fn read_body(&self, mut response: Response) -> Result<Option<Vec<u8>>, reqwest::Error> {
        if response.content_length().is_some_and(|len| len > self.max_body) {
            return Ok(None);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > self.max_body {
                return Ok(None);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Some(body))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> FetchResponse {
        let started = Instant::now();

        let response = match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Fetch of {} failed: {}", url, e);
                return FetchResponse::bare(FetchOutcome::transport(
                    classify_transport_error(&e),
                    started.elapsed(),
                ));
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().clone();

        match self.read_body(response).await {
            Ok(None) => {
                tracing::warn!("Body of {} exceeds {} bytes, dropped", url, self.max_body);
                FetchResponse {
                    outcome: FetchOutcome::transport(StatusClass::TerminalError, started.elapsed()),
                    body: None,
                    final_url: Some(final_url),
                }
            }
            Ok(Some(body)) => FetchResponse {
                outcome: FetchOutcome::from_status(status, started.elapsed(), Some(&body)),
                body: Some(body),
                final_url: Some(final_url),
            },
            Err(e) => {
                tracing::debug!("Reading body of {} failed: {}", url, e);
                FetchResponse {
                    outcome: FetchOutcome::transport(
                        classify_transport_error(&e),
                        started.elapsed(),
                    ),
                    body: None,
                    final_url: Some(final_url),
                }
            }
        }
    }
}

/// Timeouts and connection-level failures are worth retrying, the rest are not
fn classify_transport_error(error: &reqwest::Error) -> StatusClass {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        StatusClass::TransientError
    } else {
        StatusClass::TerminalError
    }
}

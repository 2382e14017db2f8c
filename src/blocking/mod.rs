//! Blocking detection
//!
//! Origin-side rejection (explicit status codes, CAPTCHA pages, IP bans) is
//! detected from fetch outcomes. The [`BlockDetector`] state machine counts
//! suspicious outcomes and decides when a source is blocked; what counts as a
//! suspicious body is delegated to a [`BlockClassifier`] so the rules can
//! change without touching the state machine.

mod classifier;
mod detector;

pub use classifier::{BlockClassifier, PatternClassifier};
pub use detector::{BlockDetector, BlockState, BlockVerdict};

use std::fmt;

/// Why an outcome looked like a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSignal {
    Forbidden,
    RateLimited,
    ServiceUnavailable,
    Captcha,
    IpBan,
    /// Third or later consecutive non-2xx response
    RepeatedNon2xx,
}

impl BlockSignal {
    /// Signal carried by the HTTP status alone, if any
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            403 => Some(Self::Forbidden),
            429 => Some(Self::RateLimited),
            503 => Some(Self::ServiceUnavailable),
            _ => None,
        }
    }

    /// Reason string stored as the source's `last_block_reason`
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Forbidden => "HTTP_403_FORBIDDEN",
            Self::RateLimited => "HTTP_429_RATE_LIMIT",
            Self::ServiceUnavailable => "HTTP_503_SERVICE_UNAVAILABLE",
            Self::Captcha => "CAPTCHA",
            Self::IpBan => "IP_BAN",
            Self::RepeatedNon2xx => "REPEATED_NON_2XX",
        }
    }
}

impl fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

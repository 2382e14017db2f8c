//! Body classifiers for block detection

use super::BlockSignal;
use regex::RegexSet;
use scraper::{Html, Selector};

/// Text that shows up on CAPTCHA and bot-challenge interstitials
const CAPTCHA_PATTERNS: &[&str] = &[
    r"(?i)captcha",
    r"(?i)verify\s+you\s+are\s+(a\s+)?human",
    r"(?i)are\s+you\s+a\s+robot",
    r"(?i)unusual\s+traffic",
    r"(?i)checking\s+your\s+browser",
    r"(?i)security\s+check",
];

/// Text that shows up on IP ban and hard rate-limit pages
const IP_BAN_PATTERNS: &[&str] = &[
    r"(?i)\bip\b[^\n]{0,40}\b(banned|blocked)\b",
    r"(?i)access\s+denied",
    r"(?i)too\s+many\s+requests",
    r"(?i)rate\s+limit\s+exceeded",
    r"(?i)temporarily\s+blocked",
];

/// Challenge widgets, matched structurally
const CHALLENGE_SELECTORS: &[&str] = &[
    r#"iframe[src*="recaptcha"]"#,
    r#"iframe[src*="hcaptcha"]"#,
    "div.g-recaptcha",
    "div.h-captcha",
    "#cf-wrapper",
    "#challenge-form",
];

/// Decides whether a response body looks like a block page
pub trait BlockClassifier: Send + Sync {
    /// Returns the signal the body carries, if any
    fn classify(&self, body: &str) -> Option<BlockSignal>;
}

/// Regex and selector based [`BlockClassifier`]
pub struct PatternClassifier {
    captcha: RegexSet,
    ip_ban: RegexSet,
    selectors: Vec<Selector>,
}

impl PatternClassifier {
    /// Classifier with the built-in CAPTCHA and IP-ban rules
    pub fn new() -> Self {
        Self::with_patterns(CAPTCHA_PATTERNS, IP_BAN_PATTERNS)
    }

    /// Classifier with custom text rules
    ///
    /// Patterns that fail to compile are logged and skipped.
    pub fn with_patterns(captcha: &[&str], ip_ban: &[&str]) -> Self {
        let selectors = CHALLENGE_SELECTORS
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(selector) => Some(selector),
                Err(e) => {
                    tracing::warn!("Invalid challenge selector '{}': {:?}", s, e);
                    None
                }
            })
            .collect();

        Self {
            captcha: compile_set(captcha),
            ip_ban: compile_set(ip_ban),
            selectors,
        }
    }

    fn has_challenge_widget(&self, body: &str) -> bool {
        if !body.contains('<') {
            return false;
        }
        let document = Html::parse_document(body);
        self.selectors
            .iter()
            .any(|selector| document.select(selector).next().is_some())
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockClassifier for PatternClassifier {
    fn classify(&self, body: &str) -> Option<BlockSignal> {
        if self.captcha.is_match(body) || self.has_challenge_widget(body) {
            return Some(BlockSignal::Captcha);
        }
        if self.ip_ban.is_match(body) {
            return Some(BlockSignal::IpBan);
        }
        None
    }
}

fn compile_set(patterns: &[&str]) -> RegexSet {
    let valid: Vec<&str> = patterns
        .iter()
        .copied()
        .filter(|p| match regex::Regex::new(p) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Invalid block pattern '{}': {}", p, e);
                false
            }
        })
        .collect();

    RegexSet::new(valid).unwrap_or_else(|_| RegexSet::empty())
}

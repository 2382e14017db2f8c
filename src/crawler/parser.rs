//! Parser contract and built-in parsers
//!
//! The session hands each fetched body to a [`Parser`] and stores whatever
//! [`ParsedDocument`] comes back. Format internals stay in here:
//! - `HtmlParser` extracts title, visible text and followable links
//! - `TextParser` stores plain text as-is
//! - `ParserSet` picks a parser by the source's content type

use crate::source::{ContentType, Source};
use crate::{HarvestError, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Elements whose text is never part of the document content
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// A document ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Where the document was fetched from
    pub locator: String,
    pub title: Option<String>,
    pub content: String,
    /// Absolute links found in the document, in document order
    pub links: Vec<Url>,
}

/// Turns a fetched body into a [`ParsedDocument`]
pub trait Parser: Send + Sync {
    fn parse(&self, source: &Source, locator: &Url, body: &[u8]) -> Result<ParsedDocument>;
}

/// HTML parser built on `scraper`
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl Parser for HtmlParser {
    fn parse(&self, _source: &Source, locator: &Url, body: &[u8]) -> Result<ParsedDocument> {
        if body.is_empty() {
            return Err(HarvestError::Parse {
                url: locator.to_string(),
                message: "empty body".to_string(),
            });
        }

        let html = String::from_utf8_lossy(body);
        Ok(parse_html(&html, locator))
    }
}

/// Plain text parser: the first non-empty line is the title
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl Parser for TextParser {
    fn parse(&self, _source: &Source, locator: &Url, body: &[u8]) -> Result<ParsedDocument> {
        let text = String::from_utf8_lossy(body);
        let content = text.trim();
        if content.is_empty() {
            return Err(HarvestError::Parse {
                url: locator.to_string(),
                message: "empty body".to_string(),
            });
        }

        let title = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);

        Ok(ParsedDocument {
            locator: locator.to_string(),
            title,
            content: content.to_string(),
            links: Vec::new(),
        })
    }
}

/// Dispatches to a parser by content type
pub struct ParserSet {
    parsers: HashMap<ContentType, Arc<dyn Parser>>,
    fallback: Arc<dyn Parser>,
}

impl ParserSet {
    /// An empty set that sends everything to `fallback`
    pub fn with_fallback(fallback: Arc<dyn Parser>) -> Self {
        Self {
            parsers: HashMap::new(),
            fallback,
        }
    }

    /// Registers the parser for a content type, replacing any previous one
    pub fn register(mut self, content_type: ContentType, parser: Arc<dyn Parser>) -> Self {
        self.parsers.insert(content_type, parser);
        self
    }

    fn parser_for(&self, content_type: ContentType) -> &Arc<dyn Parser> {
        self.parsers.get(&content_type).unwrap_or(&self.fallback)
    }
}

impl Default for ParserSet {
    /// HTML through `HtmlParser`, everything else as plain text
    fn default() -> Self {
        Self::with_fallback(Arc::new(TextParser)).register(ContentType::Html, Arc::new(HtmlParser))
    }
}

impl Parser for ParserSet {
    fn parse(&self, source: &Source, locator: &Url, body: &[u8]) -> Result<ParsedDocument> {
        self.parser_for(source.content_type)
            .parse(source, locator, body)
    }
}

/// Parses HTML content and extracts title, text and links
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs and fragment-only links
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
///
/// # Example
///
/// ```
/// use sumi_harvest::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links[0].as_str(), "https://example.com/page");
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedDocument {
    let document = Html::parse_document(html);

    ParsedDocument {
        locator: base_url.to_string(),
        title: extract_title(&document),
        content: extract_text(&document),
        links: extract_links(&document, base_url),
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Collects visible body text, one whitespace-normalized run per text node
fn extract_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .map(|parent| SKIPPED_ELEMENTS.contains(&parent.value().name()))
            .unwrap_or(false);
        if hidden {
            continue;
        }

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.is_empty() {
            parts.push(normalized);
        }
    }

    parts.join(" ")
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}

//! Candidate item enumeration
//!
//! An [`Enumerator`] opens a lazy, finite item stream for a source. Each item
//! carries the cursor that resumes enumeration right after it, so a paused
//! session can continue without reprocessing items it already stored.

use crate::source::Source;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use url::Url;

/// Opaque continuation marker owned by the enumerator that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the cursor as an item offset, as offset-based enumerators write it
    pub fn as_offset(&self) -> Option<usize> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One item to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub locator: Url,
    /// Resumes enumeration after this item
    pub cursor: Cursor,
}

/// Lazy sequence of candidate items
#[async_trait]
pub trait ItemStream: Send {
    /// Next item, or `None` once the sequence is exhausted
    async fn next_item(&mut self) -> Result<Option<CandidateItem>>;
}

/// Produces item streams for sources
#[async_trait]
pub trait Enumerator: Send + Sync {
    /// Opens the stream for `source`, continuing after `cursor` when given
    async fn open(&self, source: &Source, cursor: Option<&Cursor>) -> Result<Box<dyn ItemStream>>;
}

/// Enumerates a fixed list of URLs with offset cursors
pub struct ListStream {
    items: Vec<Url>,
    position: usize,
}

impl ListStream {
    /// Stream over `items`, skipping everything before `cursor`
    pub fn new(items: Vec<Url>, cursor: Option<&Cursor>) -> Self {
        let position = cursor
            .and_then(Cursor::as_offset)
            .unwrap_or(0)
            .min(items.len());
        Self { items, position }
    }
}

#[async_trait]
impl ItemStream for ListStream {
    async fn next_item(&mut self) -> Result<Option<CandidateItem>> {
        let Some(locator) = self.items.get(self.position).cloned() else {
            return Ok(None);
        };
        self.position += 1;
        Ok(Some(CandidateItem {
            locator,
            cursor: Cursor::new(self.position.to_string()),
        }))
    }
}

/// Yields the source's own URL as the only item
///
/// With `follow_links` the session discovers the rest of the site from there.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedEnumerator;

#[async_trait]
impl Enumerator for SeedEnumerator {
    async fn open(&self, source: &Source, cursor: Option<&Cursor>) -> Result<Box<dyn ItemStream>> {
        Ok(Box::new(ListStream::new(vec![source.url.clone()], cursor)))
    }
}

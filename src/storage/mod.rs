//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Document persistence with content-hash deduplication
//! - Append-only crawl run history
//! - Per-source continuation checkpoints for resume

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{StorageError, StorageResult, Store};

use crate::state::EndReason;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// Identifier of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Summary of one finished crawl session
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRun {
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub hits_collected: u32,
    pub end_reason: EndReason,
    /// Items that failed permanently during the session
    pub pages_failed: u32,
    pub bytes_downloaded: u64,
    /// Last item error or block reason, if any
    pub error: Option<String>,
}

impl CrawlRun {
    /// Wall-clock length of the session
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Hex-encoded SHA-256 of a document's content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

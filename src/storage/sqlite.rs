//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::crawler::{Cursor, ParsedDocument};
use crate::state::EndReason;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageError, StorageResult, Store};
use crate::storage::{content_hash, CrawlRun, DocumentId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "source_id, started_at, ended_at, hits_collected, end_reason,
     pages_failed, bytes_downloaded, error";

/// SQLite storage backend
///
/// The connection sits behind a mutex so one store can be shared by every
/// worker; each call holds the lock for a single statement or two.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates a new SqliteStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Raw `crawl_runs` row before timestamps and enums are decoded
struct RunRow {
    source_id: String,
    started_at: String,
    ended_at: String,
    hits_collected: u32,
    end_reason: String,
    pages_failed: u32,
    bytes_downloaded: i64,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_id: row.get(0)?,
            started_at: row.get(1)?,
            ended_at: row.get(2)?,
            hits_collected: row.get(3)?,
            end_reason: row.get(4)?,
            pages_failed: row.get(5)?,
            bytes_downloaded: row.get(6)?,
            error: row.get(7)?,
        })
    }

    fn decode(self) -> StorageResult<CrawlRun> {
        let end_reason = EndReason::from_db_string(&self.end_reason).ok_or_else(|| {
            StorageError::Corrupt(format!("unknown end_reason '{}'", self.end_reason))
        })?;

        Ok(CrawlRun {
            started_at: parse_timestamp(&self.started_at)?,
            ended_at: parse_timestamp(&self.ended_at)?,
            source_id: self.source_id,
            hits_collected: self.hits_collected,
            end_reason,
            pages_failed: self.pages_failed,
            bytes_downloaded: self.bytes_downloaded.max(0) as u64,
            error: self.error,
        })
    }
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn collect_runs(rows: Vec<RunRow>) -> StorageResult<Vec<CrawlRun>> {
    rows.into_iter().map(RunRow::decode).collect()
}

impl Store for SqliteStore {
    // ===== Documents =====

    fn save(&self, source_id: &str, document: &ParsedDocument) -> StorageResult<DocumentId> {
        let hash = content_hash(&document.content);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO documents (source_id, url, title, content, content_hash, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(content_hash) DO NOTHING",
            params![
                source_id,
                document.locator,
                document.title,
                document.content,
                hash,
                now
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM documents WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;

        Ok(DocumentId(id))
    }

    fn count_documents(&self, source_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM documents WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Crawl Runs =====

    fn record_run(&self, run: &CrawlRun) -> StorageResult<()> {
        self.conn.lock().execute(
            &format!(
                "INSERT INTO crawl_runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                RUN_COLUMNS
            ),
            params![
                run.source_id,
                run.started_at.to_rfc3339(),
                run.ended_at.to_rfc3339(),
                run.hits_collected,
                run.end_reason.to_db_string(),
                run.pages_failed,
                run.bytes_downloaded as i64,
                run.error
            ],
        )?;
        Ok(())
    }

    fn runs_for(&self, source_id: &str, limit: usize) -> StorageResult<Vec<CrawlRun>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM crawl_runs WHERE source_id = ?1 ORDER BY id DESC LIMIT ?2",
                RUN_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![source_id, limit as i64], RunRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        collect_runs(rows)
    }

    fn latest_run(&self, source_id: &str) -> StorageResult<Option<CrawlRun>> {
        let row = self
            .conn
            .lock()
            .query_row(
                &format!(
                    "SELECT {} FROM crawl_runs WHERE source_id = ?1 ORDER BY id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![source_id],
                RunRow::from_row,
            )
            .optional()?;

        row.map(RunRow::decode).transpose()
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<CrawlRun>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM crawl_runs ORDER BY id DESC LIMIT ?1",
                RUN_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![limit as i64], RunRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        collect_runs(rows)
    }

    // ===== Checkpoints =====

    fn save_checkpoint(&self, source_id: &str, cursor: &Cursor) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO checkpoints (source_id, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_id) DO UPDATE SET cursor = excluded.cursor,
             updated_at = excluded.updated_at",
            params![source_id, cursor.as_str(), now],
        )?;
        Ok(())
    }

    fn load_checkpoint(&self, source_id: &str) -> StorageResult<Option<Cursor>> {
        let cursor: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT cursor FROM checkpoints WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.map(Cursor::new))
    }

    fn clear_checkpoint(&self, source_id: &str) -> StorageResult<()> {
        self.conn.lock().execute(
            "DELETE FROM checkpoints WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(())
    }
}

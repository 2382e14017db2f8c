//! State module for tracking source status
//!
//! This module provides the per-source state the crawl manager writes and the
//! scheduler and API layer read.
//!
//! # Components
//!
//! - `SourceStatus`: Observable status of a source (idle, running, completed, ...)
//! - `EndReason`: Why a crawl session ended, and the status it maps to
//! - `SourceCell`: Per-source runtime state behind its own lock
//! - `SourceCells`: Map of all cells, one per source id

mod source_cell;
mod source_status;

// Re-export main types
pub use source_cell::{
    CellSnapshot, ClaimMode, SessionTicket, SourceCell, SourceCells, SourceRuntime,
};
pub use source_status::{EndReason, SourceStatus};

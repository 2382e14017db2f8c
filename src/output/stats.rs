//! Statistics over the crawl run history
//!
//! This module aggregates the append-only `crawl_runs` table for the
//! `--stats` command.

use crate::state::EndReason;
use crate::storage::{CrawlRun, StorageResult, Store};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Aggregate of one source's runs
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub source_id: String,
    pub runs: u64,
    pub hits: u64,
    pub pages_failed: u64,
    pub documents: u64,
    pub last_end_reason: EndReason,
    pub last_ended_at: DateTime<Utc>,
}

/// Crawl run statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    /// Number of runs considered
    pub total_runs: u64,

    /// Count of runs by end reason
    pub runs_by_reason: HashMap<EndReason, u64>,

    pub total_hits: u64,
    pub total_failed: u64,
    pub bytes_downloaded: u64,

    /// One entry per source, most recently active first
    pub sources: Vec<SourceSummary>,
}

/// Loads statistics over the most recent `limit` runs
pub fn load_statistics(store: &dyn Store, limit: usize) -> StorageResult<RunStatistics> {
    let runs = store.recent_runs(limit)?;
    let mut stats = summarize(&runs);
    for source in &mut stats.sources {
        source.documents = store.count_documents(&source.source_id)?;
    }
    Ok(stats)
}

/// Aggregates runs given newest first
pub fn summarize(runs: &[CrawlRun]) -> RunStatistics {
    let mut runs_by_reason = HashMap::new();
    let mut sources: Vec<SourceSummary> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for run in runs {
        *runs_by_reason.entry(run.end_reason).or_insert(0) += 1;

        let position = *index.entry(run.source_id.as_str()).or_insert_with(|| {
            sources.push(SourceSummary {
                source_id: run.source_id.clone(),
                runs: 0,
                hits: 0,
                pages_failed: 0,
                documents: 0,
                last_end_reason: run.end_reason,
                last_ended_at: run.ended_at,
            });
            sources.len() - 1
        });

        let summary = &mut sources[position];
        summary.runs += 1;
        summary.hits += u64::from(run.hits_collected);
        summary.pages_failed += u64::from(run.pages_failed);
    }

    RunStatistics {
        total_runs: runs.len() as u64,
        runs_by_reason,
        total_hits: runs.iter().map(|r| u64::from(r.hits_collected)).sum(),
        total_failed: runs.iter().map(|r| u64::from(r.pages_failed)).sum(),
        bytes_downloaded: runs.iter().map(|r| r.bytes_downloaded).sum(),
        sources,
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Runs: {}", stats.total_runs);
    println!("  Documents collected: {}", stats.total_hits);
    println!("  Items failed: {}", stats.total_failed);
    println!("  Downloaded: {}", format_bytes(stats.bytes_downloaded));
    println!();

    if stats.total_runs > 0 {
        println!("Runs by End Reason:");
        let mut reasons: Vec<_> = stats.runs_by_reason.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1));
        for (reason, count) in reasons {
            let percentage = *count as f64 / stats.total_runs as f64 * 100.0;
            println!("  {}: {} ({:.1}%)", reason, count, percentage);
        }
        println!();
    }

    if !stats.sources.is_empty() {
        println!("Sources ({}):", stats.sources.len());
        for source in &stats.sources {
            println!(
                "  {} - {} runs, {} hits, {} failed, {} stored; last: {} at {}",
                source.source_id,
                source.runs,
                source.hits,
                source.pages_failed,
                source.documents,
                source.last_end_reason,
                source.last_ended_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

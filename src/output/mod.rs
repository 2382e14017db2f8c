//! Output module for reporting on crawl history
//!
//! This module handles:
//! - Aggregating the crawl run history into statistics
//! - Printing statistics and source overviews for the CLI

pub mod stats;

pub use stats::{format_bytes, load_statistics, print_statistics, RunStatistics, SourceSummary};

use crate::scheduler::JobInfo;

/// Prints the configured sources with their schedules, as for `--dry-run`
pub fn print_jobs(jobs: &[JobInfo]) {
    println!("Configured sources ({}):", jobs.len());
    for job in jobs {
        let next = match (job.enabled, job.next_run) {
            (false, _) => "disabled".to_string(),
            (true, Some(next)) => next.format("%Y-%m-%d %H:%M UTC").to_string(),
            (true, None) => "never".to_string(),
        };
        println!(
            "  {} ({}) - cron \"{}\", next run: {}",
            job.source_id, job.name, job.frequency, next
        );
    }
}

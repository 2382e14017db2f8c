//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest content harvester.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::{build_sources, load_config_with_hash, Config};
use sumi_harvest::crawler::{Collaborators, CrawlManager, HttpFetcher, ManagerSettings};
use sumi_harvest::output::{load_statistics, print_jobs, print_statistics};
use sumi_harvest::scheduler::Scheduler;
use sumi_harvest::source::MemoryRegistry;
use sumi_harvest::storage::open_store;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Number of runs `--stats` aggregates
const STATS_WINDOW: usize = 1000;

/// Sumi-Harvest: A polite, schedule-driven content harvester
///
/// Sumi-Harvest crawls configured sources on cron schedules while respecting
/// robots.txt, per-source rate limits, and signs of being blocked.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A polite, schedule-driven content harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run one session for a source now and wait for it to finish
    #[arg(long, value_name = "SOURCE_ID", conflicts_with_all = ["resume", "dry_run", "stats"])]
    crawl: Option<String>,

    /// Resume a paused or blocked source from its checkpoint and wait for it
    #[arg(long, value_name = "SOURCE_ID", conflicts_with_all = ["crawl", "dry_run", "stats"])]
    resume: Option<String>,

    /// Validate config and show the schedule without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show crawl run statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(source_id) = cli.crawl {
        handle_single(config, &source_id, false).await
    } else if let Some(source_id) = cli.resume {
        handle_single(config, &source_id, true).await
    } else {
        handle_daemon(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Wires the store, registry and HTTP fetcher into a manager
fn build_manager(config: &Config) -> Result<CrawlManager> {
    let sources = build_sources(config)?;
    let registry = Arc::new(MemoryRegistry::from_sources(sources));
    let store = Arc::new(
        open_store(Path::new(&config.output.database_path))
            .context("failed to open the database")?,
    );
    let fetcher = Arc::new(
        HttpFetcher::new(&config.user_agent)
            .context("failed to build HTTP client")?
            .with_max_body(config.orchestrator.max_body_bytes),
    );

    Ok(CrawlManager::new(
        ManagerSettings::from_config(config),
        Collaborators::new(fetcher, store, registry),
    ))
}

/// Handles the --dry-run mode: validates config and shows the schedule
fn handle_dry_run(config: &Config) -> Result<()> {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Orchestrator:");
    println!("  Max workers: {}", config.orchestrator.max_workers);
    println!("  Queue capacity: {}", config.orchestrator.queue_capacity);
    println!("  Tick interval: {}s", config.orchestrator.tick_interval_secs);
    println!("  Failure ceiling: {}", config.orchestrator.failure_ceiling);
    println!("  Block threshold: {}", config.orchestrator.block_threshold);
    println!("  Max body: {} bytes", config.orchestrator.max_body_bytes);

    println!("\nUser Agent: {}", config.user_agent.user_agent());
    println!("Database: {}\n", config.output.database_path);

    let sources = build_sources(config)?;
    let now = chrono::Utc::now();
    let jobs: Vec<_> = sources
        .iter()
        .map(|source| sumi_harvest::scheduler::JobInfo {
            source_id: source.id.clone(),
            name: source.name.clone(),
            frequency: source.config.frequency.to_string(),
            enabled: source.config.enabled,
            running: false,
            next_run: source.config.frequency.next_after(&now),
        })
        .collect();
    print_jobs(&jobs);

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows run history from the database
fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store, STATS_WINDOW)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles --crawl and --resume: one session, then report
async fn handle_single(config: Config, source_id: &str, resume: bool) -> Result<()> {
    let manager = build_manager(&config)?;

    if resume {
        manager.resume(source_id)?;
    } else {
        manager.start(source_id)?;
    }

    tokio::select! {
        result = manager.wait_idle(source_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, pausing {}", source_id);
            // The session may have ended on its own in the meantime
            let _ = manager.pause(source_id);
            manager.wait_idle(source_id).await?;
        }
    }

    let status = manager.status(source_id)?;
    println!("Source: {}", source_id);
    println!("  Status: {}", status.status);
    println!("  Hits: {}", status.hits_so_far);
    if let Some(reason) = &status.last_block_reason {
        println!("  Block reason: {}", reason);
    }
    if let Some(run) = &status.last_run {
        println!("  End reason: {}", run.end_reason);
        println!("  Duration: {}s", run.duration().num_seconds());
        if let Some(error) = &run.error {
            println!("  Last error: {}", error);
        }
    }

    Ok(())
}

/// Runs the scheduler until Ctrl-C, then lets active sessions pause
async fn handle_daemon(config: Config) -> Result<()> {
    let manager = build_manager(&config)?;
    let scheduler = Arc::new(Scheduler::new(
        manager.clone(),
        Duration::from_secs(config.orchestrator.tick_interval_secs),
    ));

    for job in scheduler.list_jobs() {
        tracing::info!(
            source_id = %job.source_id,
            "Cron \"{}\", next run {:?}",
            job.frequency,
            job.next_run
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    shutdown_tx.send_replace(true);
    scheduler_task.await.context("scheduler task panicked")?;

    for source in manager.registry().sources() {
        if manager.is_running(&source.id) && manager.pause(&source.id).is_ok() {
            manager.wait_idle(&source.id).await?;
        }
    }

    let overview = manager.overview();
    tracing::info!(
        "Stopped: {} documents stored, {} paused, {} blocked, {} failed",
        overview.documents,
        overview.paused,
        overview.blocked,
        overview.failed
    );

    Ok(())
}

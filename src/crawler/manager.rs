//! Crawl Manager
//!
//! The operator-facing handle: start, pause, resume and inspect per-source
//! crawl sessions. Sessions run on the worker pool; the manager only claims
//! sources and enqueues jobs, so every call returns without waiting for a
//! session to finish.

use crate::blocking::{BlockClassifier, BlockState, PatternClassifier};
use crate::config::Config;
use crate::crawler::pool::{Job, WorkerPool};
use crate::crawler::session::{SessionContext, SessionLimits};
use crate::crawler::{Enumerator, Fetcher, Parser, ParserSet, SeedEnumerator};
use crate::politeness::PolitenessController;
use crate::source::SourceRegistry;
use crate::state::{ClaimMode, SourceCells, SourceStatus};
use crate::storage::{CrawlRun, Store};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Pool sizing and session limits
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub block_threshold: u32,
    pub limits: SessionLimits,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_workers: 5,
            queue_capacity: 256,
            block_threshold: 3,
            limits: SessionLimits::default(),
        }
    }
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        let orchestrator = &config.orchestrator;
        Self {
            max_workers: orchestrator.max_workers as usize,
            queue_capacity: orchestrator.queue_capacity as usize,
            block_threshold: orchestrator.block_threshold,
            limits: SessionLimits {
                failure_ceiling: orchestrator.failure_ceiling,
                max_backoff: Duration::from_secs(orchestrator.max_backoff_secs),
                robots_agent: config.user_agent.crawler_name.clone(),
            },
        }
    }
}

/// The external contracts a manager drives
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<dyn SourceRegistry>,
    pub enumerator: Arc<dyn Enumerator>,
    pub parser: Arc<dyn Parser>,
    pub classifier: Arc<dyn BlockClassifier>,
}

impl Collaborators {
    /// Seed enumeration, the default parser set and pattern classifier
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn Store>,
        registry: Arc<dyn SourceRegistry>,
    ) -> Self {
        Self {
            fetcher,
            store,
            registry,
            enumerator: Arc::new(SeedEnumerator),
            parser: Arc::new(ParserSet::default()),
            classifier: Arc::new(PatternClassifier::default()),
        }
    }

    pub fn with_enumerator(mut self, enumerator: Arc<dyn Enumerator>) -> Self {
        self.enumerator = enumerator;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn BlockClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

/// Read-only view of a source
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub source_id: String,
    pub status: SourceStatus,
    /// Hits of the active session, or of the last one
    pub hits_so_far: u32,
    pub active: bool,
    pub consecutive_failures: u32,
    pub block_state: BlockState,
    pub last_block_reason: Option<String>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub last_run: Option<CrawlRun>,
}

/// Counters across all sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overview {
    pub sources: usize,
    pub active_sessions: usize,
    pub queued_jobs: usize,
    pub paused: usize,
    pub blocked: usize,
    pub failed: usize,
    /// Documents stored since startup
    pub documents: u64,
}

/// Cheaply cloneable handle to the crawl orchestrator
#[derive(Clone)]
pub struct CrawlManager {
    ctx: Arc<SessionContext>,
    pool: Arc<WorkerPool>,
}

impl CrawlManager {
    /// Creates the manager and spawns its worker pool
    ///
    /// Each registered source starts in the status its last recorded run
    /// left it in, so paused and blocked sources survive a restart.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: ManagerSettings, collaborators: Collaborators) -> Self {
        let ctx = Arc::new(SessionContext {
            limits: settings.limits,
            cells: SourceCells::new(settings.block_threshold),
            politeness: PolitenessController::new(),
            fetcher: collaborators.fetcher,
            enumerator: collaborators.enumerator,
            parser: collaborators.parser,
            classifier: collaborators.classifier,
            store: collaborators.store,
            registry: collaborators.registry,
        });

        restore_history(&ctx);

        let pool = WorkerPool::spawn(
            settings.max_workers,
            settings.queue_capacity,
            Arc::clone(&ctx),
        );

        tracing::debug!(
            "Crawl manager started with {} workers, queue capacity {}",
            settings.max_workers,
            settings.queue_capacity
        );

        Self {
            ctx,
            pool: Arc::new(pool),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SourceRegistry> {
        &self.ctx.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    /// Starts a fresh session from the beginning of the enumeration
    ///
    /// # Errors
    ///
    /// * `UnknownSource` - no such source in the registry
    /// * `AlreadyRunning` - a session for the source exists
    /// * `InvalidTransition` - the source is blocked and must be resumed
    /// * `QueueFull` - the job queue is saturated
    pub fn start(&self, source_id: &str) -> Result<()> {
        self.claim_and_submit(source_id, ClaimMode::Start)
    }

    /// Asks the active session to stop at its next item boundary
    ///
    /// The session ends as `paused` and keeps its checkpoint.
    pub fn stop(&self, source_id: &str) -> Result<()> {
        self.ensure_known(source_id)?;
        let cell = self
            .ctx
            .cells
            .get(source_id)
            .ok_or_else(|| HarvestError::NoSuchSession {
                source_id: source_id.to_string(),
            })?;
        cell.request_cancel()?;
        tracing::info!(source_id = %source_id, "Pause requested");
        Ok(())
    }

    pub fn pause(&self, source_id: &str) -> Result<()> {
        self.stop(source_id)
    }

    /// Continues a paused or blocked source from its last checkpoint
    ///
    /// Resuming a blocked source re-arms its block detector.
    pub fn resume(&self, source_id: &str) -> Result<()> {
        self.claim_and_submit(source_id, ClaimMode::Resume)
    }

    /// Enqueues a cron-triggered job
    ///
    /// The worker claims the source just before dispatch and skips the job if
    /// the source is running, paused or blocked by then.
    pub fn submit_scheduled(&self, source_id: &str) -> Result<()> {
        self.ensure_known(source_id)?;
        self.pool
            .try_submit(Job::Scheduled {
                source_id: source_id.to_string(),
            })
            .map_err(|_| HarvestError::QueueFull {
                source_id: source_id.to_string(),
            })
    }

    pub fn status(&self, source_id: &str) -> Result<StatusSnapshot> {
        self.ensure_known(source_id)?;
        let snapshot = self.ctx.cells.get_or_create(source_id).snapshot();
        let last_run = self.ctx.store.latest_run(source_id)?;

        Ok(StatusSnapshot {
            source_id: source_id.to_string(),
            status: snapshot.runtime.status,
            hits_so_far: snapshot.runtime.hits_so_far,
            active: snapshot.active,
            consecutive_failures: snapshot.runtime.consecutive_failures,
            block_state: snapshot.block_state,
            last_block_reason: snapshot.runtime.last_block_reason,
            last_crawled_at: snapshot.runtime.last_crawled_at,
            last_run,
        })
    }

    /// True if the source has an active session
    pub fn is_running(&self, source_id: &str) -> bool {
        self.ctx
            .cells
            .get(source_id)
            .map(|cell| cell.is_active())
            .unwrap_or(false)
    }

    pub fn active_sessions(&self) -> usize {
        self.ctx.cells.active_count()
    }

    pub fn overview(&self) -> Overview {
        let mut overview = Overview {
            sources: self.ctx.registry.sources().len(),
            queued_jobs: self.pool.queued(),
            ..Overview::default()
        };

        for cell in self.ctx.cells.all() {
            let snapshot = cell.snapshot();
            if snapshot.active {
                overview.active_sessions += 1;
            }
            match snapshot.runtime.status {
                SourceStatus::Paused => overview.paused += 1,
                SourceStatus::Blocked => overview.blocked += 1,
                SourceStatus::Failed => overview.failed += 1,
                _ => {}
            }
            overview.documents += snapshot.runtime.total_documents;
        }

        overview
    }

    /// Waits until the source has no active session
    pub async fn wait_idle(&self, source_id: &str) -> Result<()> {
        self.ensure_known(source_id)?;
        let cell = self.ctx.cells.get_or_create(source_id);
        cell.wait_idle().await;
        Ok(())
    }

    fn ensure_known(&self, source_id: &str) -> Result<()> {
        match self.ctx.registry.source(source_id) {
            Some(_) => Ok(()),
            None => Err(HarvestError::UnknownSource(source_id.to_string())),
        }
    }

    fn claim_and_submit(&self, source_id: &str, mode: ClaimMode) -> Result<()> {
        self.ensure_known(source_id)?;
        let cell = self.ctx.cells.get_or_create(source_id);
        let ticket = cell.claim(mode)?;

        match self.pool.try_submit(Job::Claimed { ticket }) {
            Ok(()) => {
                tracing::info!(source_id = %source_id, mode = ?mode, "Crawl session queued");
                Ok(())
            }
            Err(job) => {
                if let Job::Claimed { ticket } = job {
                    cell.rollback(ticket);
                }
                Err(HarvestError::QueueFull {
                    source_id: source_id.to_string(),
                })
            }
        }
    }
}

/// Seeds every source cell from the store's run history
fn restore_history(ctx: &SessionContext) {
    for source in ctx.registry.sources() {
        match ctx.store.latest_run(&source.id) {
            Ok(Some(run)) => {
                let cell = ctx.cells.get_or_create(&source.id);
                cell.restore(&run);
                ctx.registry.publish(&source.id, &cell.snapshot().runtime);
                tracing::debug!(
                    source_id = %source.id,
                    "Restored status {} from last run",
                    cell.status()
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(source_id = %source.id, "Could not read run history: {}", e);
            }
        }
    }
}

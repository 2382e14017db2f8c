use crate::blocking::{BlockDetector, BlockSignal, BlockState, BlockVerdict};
use crate::crawler::FetchOutcome;
use crate::state::{EndReason, SourceStatus};
use crate::storage::CrawlRun;
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Mutable runtime state of a source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRuntime {
    pub status: SourceStatus,
    pub consecutive_failures: u32,
    pub last_block_reason: Option<String>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    /// Hits of the active session, or of the last one once it ended
    pub hits_so_far: u32,
    /// Documents stored across all sessions since startup
    pub total_documents: u64,
    pub last_error: Option<String>,
}

impl Default for SourceRuntime {
    fn default() -> Self {
        Self {
            status: SourceStatus::Idle,
            consecutive_failures: 0,
            last_block_reason: None,
            last_crawled_at: None,
            hits_so_far: 0,
            total_documents: 0,
            last_error: None,
        }
    }
}

/// How a session is being claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Manual start from the beginning of the enumeration
    Start,
    /// Continue from the persisted checkpoint
    Resume,
    /// Cron trigger, also from the beginning
    ///
    /// Refused for paused and blocked sources; only `resume` moves them on.
    Scheduled,
}

impl ClaimMode {
    pub fn is_resume(&self) -> bool {
        matches!(self, Self::Resume)
    }
}

/// Proof that the caller owns the single session of a source
///
/// Produced by [`SourceCell::claim`] and consumed when the session ends.
#[derive(Debug)]
pub struct SessionTicket {
    pub source_id: String,
    pub session_id: u64,
    pub mode: ClaimMode,
    pub started_at: DateTime<Utc>,
    /// Flips to `true` when an operator asks the session to stop
    pub cancel: watch::Receiver<bool>,
    previous: SourceStatus,
}

/// Runtime state plus whether a session is active, read atomically
#[derive(Debug, Clone)]
pub struct CellSnapshot {
    pub runtime: SourceRuntime,
    pub active: bool,
    pub block_state: BlockState,
}

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    cancel: watch::Sender<bool>,
}

#[derive(Debug)]
struct CellInner {
    runtime: SourceRuntime,
    active: Option<ActiveSession>,
    detector: BlockDetector,
    next_session: u64,
}

/// Per-source state guarded by its own lock
///
/// All status and counter mutations for one source go through this cell, so
/// they are serialized per source while unrelated sources never contend.
#[derive(Debug)]
pub struct SourceCell {
    source_id: String,
    inner: Mutex<CellInner>,
    running: watch::Sender<bool>,
}

impl SourceCell {
    pub fn new(source_id: impl Into<String>, block_threshold: u32) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            source_id: source_id.into(),
            inner: Mutex::new(CellInner {
                runtime: SourceRuntime::default(),
                active: None,
                detector: BlockDetector::new(block_threshold),
                next_session: 1,
            }),
            running,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Claims the source for a new session
    ///
    /// This is the only way a session comes into existence, and it checks and
    /// sets the active session under the same lock.
    ///
    /// # Errors
    ///
    /// * `AlreadyRunning` - a session is active
    /// * `NoSuchSession` - resuming a source that is neither paused nor blocked
    /// * `InvalidTransition` - starting a blocked source without resuming it,
    ///   or a cron trigger on a paused or blocked source
    pub fn claim(&self, mode: ClaimMode) -> Result<SessionTicket> {
        let mut inner = self.inner.lock();

        if inner.active.is_some() {
            return Err(HarvestError::AlreadyRunning {
                source_id: self.source_id.clone(),
            });
        }

        let previous = inner.runtime.status;
        match mode {
            ClaimMode::Resume if !previous.is_resumable() => {
                return Err(HarvestError::NoSuchSession {
                    source_id: self.source_id.clone(),
                });
            }
            ClaimMode::Start if previous == SourceStatus::Blocked => {
                return Err(HarvestError::InvalidTransition {
                    source_id: self.source_id.clone(),
                    from: previous,
                    to: SourceStatus::Running,
                });
            }
            ClaimMode::Scheduled if previous.is_resumable() => {
                return Err(HarvestError::InvalidTransition {
                    source_id: self.source_id.clone(),
                    from: previous,
                    to: SourceStatus::Running,
                });
            }
            _ => {}
        }

        let session_id = inner.next_session;
        inner.next_session += 1;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner.active = Some(ActiveSession {
            id: session_id,
            cancel: cancel_tx,
        });
        inner.detector.rearm();
        inner.runtime.status = SourceStatus::Running;
        inner.runtime.hits_so_far = 0;
        inner.runtime.consecutive_failures = 0;
        inner.runtime.last_error = None;
        self.running.send_replace(true);

        Ok(SessionTicket {
            source_id: self.source_id.clone(),
            session_id,
            mode,
            started_at: Utc::now(),
            cancel: cancel_rx,
            previous,
        })
    }

    /// Seeds the runtime from the last recorded run of a previous process
    ///
    /// Ignored once the cell has moved past `Idle`.
    pub fn restore(&self, last_run: &CrawlRun) {
        let mut inner = self.inner.lock();
        if inner.active.is_some() || inner.runtime.status != SourceStatus::Idle {
            return;
        }

        inner.runtime.status = last_run.end_reason.status();
        inner.runtime.hits_so_far = last_run.hits_collected;
        inner.runtime.last_crawled_at = Some(last_run.ended_at);
        inner.runtime.last_error = last_run.error.clone();
        if last_run.end_reason == EndReason::Blocked {
            inner.runtime.last_block_reason = last_run.error.clone();
        }
    }

    /// Undoes a claim whose job never reached a worker
    pub fn rollback(&self, ticket: SessionTicket) {
        let mut inner = self.inner.lock();
        if inner.active.as_ref().map(|a| a.id) == Some(ticket.session_id) {
            inner.active = None;
            inner.runtime.status = ticket.previous;
            self.running.send_replace(false);
        }
    }

    /// Asks the active session to stop at its next item boundary
    pub fn request_cancel(&self) -> Result<()> {
        let inner = self.inner.lock();
        match &inner.active {
            Some(active) => {
                active.cancel.send_replace(true);
                Ok(())
            }
            None => Err(HarvestError::NoSuchSession {
                source_id: self.source_id.clone(),
            }),
        }
    }

    /// Feeds an outcome of the active session to the blocking detector
    pub fn observe(&self, outcome: &FetchOutcome, body_signal: Option<BlockSignal>) -> BlockVerdict {
        let mut inner = self.inner.lock();
        let verdict = inner.detector.observe(outcome, body_signal);
        if let BlockVerdict::Blocked(signal) = verdict {
            inner.runtime.last_block_reason = Some(signal.reason().to_string());
        }
        verdict
    }

    /// Records a stored item and returns the session's hit count
    pub fn record_hit(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.runtime.hits_so_far += 1;
        inner.runtime.total_documents += 1;
        inner.runtime.consecutive_failures = 0;
        inner.runtime.hits_so_far
    }

    /// Records a failed item and returns the consecutive failure count
    pub fn record_failure(&self, error: impl Into<String>) -> u32 {
        let mut inner = self.inner.lock();
        inner.runtime.consecutive_failures += 1;
        inner.runtime.last_error = Some(error.into());
        inner.runtime.consecutive_failures
    }

    /// Ends the session identified by `ticket`
    ///
    /// Status, timestamps and the active session are updated under one lock
    /// acquisition, so readers see either the running state or the final one.
    pub fn finish(&self, ticket: &SessionTicket, reason: EndReason) -> Result<SourceRuntime> {
        let mut inner = self.inner.lock();
        let to = reason.status();

        let owns_session = inner.active.as_ref().map(|a| a.id) == Some(ticket.session_id);
        if !owns_session || !inner.runtime.status.can_transition_to(to) {
            return Err(HarvestError::InvalidTransition {
                source_id: self.source_id.clone(),
                from: inner.runtime.status,
                to,
            });
        }

        inner.active = None;
        inner.runtime.status = to;
        inner.runtime.last_crawled_at = Some(Utc::now());
        self.running.send_replace(false);

        Ok(inner.runtime.clone())
    }

    pub fn snapshot(&self) -> CellSnapshot {
        let inner = self.inner.lock();
        CellSnapshot {
            runtime: inner.runtime.clone(),
            active: inner.active.is_some(),
            block_state: inner.detector.state(),
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.inner.lock().runtime.status
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// Waits until no session is active
    pub async fn wait_idle(&self) {
        let mut rx = self.running.subscribe();
        // The sender lives as long as the cell, so this only returns once idle
        let _ = rx.wait_for(|running| !*running).await;
    }
}

/// All source cells, keyed by source id
#[derive(Debug)]
pub struct SourceCells {
    cells: DashMap<String, Arc<SourceCell>>,
    block_threshold: u32,
}

impl SourceCells {
    pub fn new(block_threshold: u32) -> Self {
        Self {
            cells: DashMap::new(),
            block_threshold,
        }
    }

    /// Returns the cell for `source_id`, creating it on first use
    pub fn get_or_create(&self, source_id: &str) -> Arc<SourceCell> {
        if let Some(cell) = self.cells.get(source_id) {
            return Arc::clone(cell.value());
        }
        let cell = self
            .cells
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(SourceCell::new(source_id, self.block_threshold)));
        Arc::clone(cell.value())
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<SourceCell>> {
        self.cells.get(source_id).map(|cell| Arc::clone(cell.value()))
    }

    /// Number of sources with an active session
    pub fn active_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_active()).count()
    }

    pub fn all(&self) -> Vec<Arc<SourceCell>> {
        self.cells.iter().map(|cell| Arc::clone(cell.value())).collect()
    }
}

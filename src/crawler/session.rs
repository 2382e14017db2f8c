//! The per-source fetch loop
//!
//! A session pulls candidate items from the enumerator and walks each one
//! through politeness, fetch, block detection, retry and storage until a
//! terminal condition is reached. Every session ends in exactly one
//! [`CrawlRun`] and one terminal status transition.

use crate::blocking::{BlockClassifier, BlockSignal, BlockVerdict};
use crate::crawler::{
    Cursor, Enumerator, FetchOutcome, Fetcher, ItemStream, ParsedDocument, Parser, StatusClass,
};
use crate::politeness::{effective_interval, PolitenessController, RobotsVerdict};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::robots::SessionRobots;
use crate::source::{Source, SourceRegistry};
use crate::state::{EndReason, SessionTicket, SourceCell, SourceCells};
use crate::storage::{CrawlRun, Store};
use crate::url::normalize_url;
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

/// Limits every session runs under
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Consecutive item failures tolerated; one more fails the session
    pub failure_ceiling: u32,
    /// Ceiling on a single retry backoff
    pub max_backoff: Duration,
    /// Product token matched against robots.txt groups
    pub robots_agent: String,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            failure_ceiling: 5,
            max_backoff: Duration::from_secs(300),
            robots_agent: "SumiHarvest".to_string(),
        }
    }
}

/// Everything a session needs, shared by all workers
pub(crate) struct SessionContext {
    pub(crate) limits: SessionLimits,
    pub(crate) cells: SourceCells,
    pub(crate) politeness: PolitenessController,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) enumerator: Arc<dyn Enumerator>,
    pub(crate) parser: Arc<dyn Parser>,
    pub(crate) classifier: Arc<dyn BlockClassifier>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Arc<dyn SourceRegistry>,
}

/// One active crawl attempt of a source
#[derive(Debug)]
pub struct CrawlSession {
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub hits_so_far: u32,
    /// Every fetch outcome of the session, in fetch order
    pub outcomes: Vec<FetchOutcome>,
    cancel: watch::Receiver<bool>,
    pages_failed: u32,
    bytes_downloaded: u64,
    last_error: Option<String>,
}

impl CrawlSession {
    fn new(ticket: &SessionTicket) -> Self {
        Self {
            source_id: ticket.source_id.clone(),
            started_at: ticket.started_at,
            hits_so_far: 0,
            outcomes: Vec::new(),
            cancel: ticket.cancel.clone(),
            pages_failed: 0,
            bytes_downloaded: 0,
            last_error: None,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn into_run(self, end_reason: EndReason) -> CrawlRun {
        CrawlRun {
            source_id: self.source_id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            hits_collected: self.hits_so_far,
            end_reason,
            pages_failed: self.pages_failed,
            bytes_downloaded: self.bytes_downloaded,
            error: self.last_error,
        }
    }
}

/// What happened to one candidate item
enum ItemResult {
    Stored(ParsedDocument),
    Disallowed,
    Failed(String),
    Blocked(BlockSignal),
}

/// Runs the session owned by `ticket` to its end
///
/// Writes the CrawlRun, then moves the cell to its terminal status and
/// publishes the new runtime state to the registry.
pub(crate) async fn run_session(ctx: &SessionContext, ticket: SessionTicket) {
    let cell = ctx.cells.get_or_create(&ticket.source_id);
    let mut session = CrawlSession::new(&ticket);

    let end_reason = match ctx.registry.source(&ticket.source_id) {
        Some(source) => {
            tracing::info!(
                source_id = %source.id,
                mode = ?ticket.mode,
                "Crawl session {} started",
                ticket.session_id
            );
            let result = {
                let mut runner = SessionRunner::new(ctx, &cell, source, &mut session);
                runner.run(ticket.mode.is_resume()).await
            };
            match result {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::error!(source_id = %ticket.source_id, "Crawl session error: {}", e);
                    session.last_error = Some(e.to_string());
                    EndReason::Failed
                }
            }
        }
        None => {
            session.last_error = Some(HarvestError::UnknownSource(ticket.source_id.clone()).to_string());
            EndReason::Failed
        }
    };

    let hits = session.hits_so_far;
    let run = session.into_run(end_reason);
    if let Err(e) = ctx.store.record_run(&run) {
        tracing::error!(source_id = %run.source_id, "Failed to record crawl run: {}", e);
    }

    match cell.finish(&ticket, end_reason) {
        Ok(runtime) => {
            ctx.registry.publish(&ticket.source_id, &runtime);
            match end_reason {
                EndReason::Blocked | EndReason::Failed => tracing::warn!(
                    source_id = %ticket.source_id,
                    hits,
                    end_reason = %end_reason,
                    error = run.error.as_deref().unwrap_or(""),
                    "Crawl session ended"
                ),
                _ => tracing::info!(
                    source_id = %ticket.source_id,
                    hits,
                    end_reason = %end_reason,
                    "Crawl session ended"
                ),
            }
        }
        Err(e) => tracing::error!(source_id = %ticket.source_id, "{}", e),
    }
}

struct SessionRunner<'a> {
    ctx: &'a SessionContext,
    cell: &'a SourceCell,
    source: Source,
    session: &'a mut CrawlSession,
    policy: RetryPolicy,
    robots: SessionRobots,
    /// Followed links waiting to be fetched, ahead of the next enumerated item
    frontier: VecDeque<Url>,
    /// Normalized locators already taken this session
    seen: HashSet<String>,
}

impl<'a> SessionRunner<'a> {
    fn new(
        ctx: &'a SessionContext,
        cell: &'a SourceCell,
        source: Source,
        session: &'a mut CrawlSession,
    ) -> Self {
        let policy = RetryPolicy::new(&source.config.retry_policy, ctx.limits.max_backoff);
        let robots = SessionRobots::new(ctx.limits.robots_agent.clone());
        Self {
            ctx,
            cell,
            source,
            session,
            policy,
            robots,
            frontier: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    async fn run(&mut self, resume: bool) -> Result<EndReason> {
        let source_id = self.source.id.clone();
        let checkpoint = if resume {
            self.ctx.store.load_checkpoint(&source_id)?
        } else {
            self.ctx.store.clear_checkpoint(&source_id)?;
            None
        };
        if let Some(cursor) = &checkpoint {
            tracing::debug!(source_id = %source_id, "Resuming after cursor {}", cursor);
        }

        let mut items = self
            .ctx
            .enumerator
            .open(&self.source, checkpoint.as_ref())
            .await?;

        loop {
            if self.session.is_cancelled() {
                return Ok(EndReason::PausedByOperator);
            }
            if self.session.hits_so_far >= self.source.config.max_hits {
                return Ok(EndReason::MaxHitsReached);
            }

            let Some((locator, cursor)) = self.next_candidate(items.as_mut()).await? else {
                return Ok(EndReason::Exhausted);
            };

            if !self.mark_seen(&locator) {
                tracing::trace!("Skipping already visited {}", locator);
                self.checkpoint(cursor.as_ref());
                continue;
            }

            match self.process_item(&locator).await {
                ItemResult::Stored(document) => {
                    self.session.hits_so_far = self.cell.record_hit();
                    if self.source.config.follow_links {
                        self.enqueue_links(&document.links);
                    }
                }
                ItemResult::Disallowed => {
                    tracing::debug!("{} disallowed by robots.txt", locator);
                }
                ItemResult::Failed(error) => {
                    tracing::debug!(source_id = %source_id, "Item {} failed: {}", locator, error);
                    self.session.pages_failed += 1;
                    self.session.last_error = Some(format!("{}: {}", locator, error));
                    let failures = self.cell.record_failure(error);
                    if failures > self.ctx.limits.failure_ceiling {
                        self.session.last_error = Some(
                            HarvestError::SessionFailed {
                                source_id: source_id.clone(),
                                failures,
                            }
                            .to_string(),
                        );
                        return Ok(EndReason::Failed);
                    }
                }
                ItemResult::Blocked(signal) => {
                    self.session.last_error = Some(signal.reason().to_string());
                    return Ok(EndReason::Blocked);
                }
            }

            self.checkpoint(cursor.as_ref());
        }
    }

    /// Next locator: followed links first, then the enumerator
    ///
    /// Only enumerated items carry a cursor.
    async fn next_candidate(
        &mut self,
        items: &mut dyn ItemStream,
    ) -> Result<Option<(Url, Option<Cursor>)>> {
        if let Some(url) = self.frontier.pop_front() {
            return Ok(Some((url, None)));
        }
        Ok(items
            .next_item()
            .await?
            .map(|item| (item.locator, Some(item.cursor))))
    }

    /// Returns false if the locator was already taken this session
    fn mark_seen(&mut self, locator: &Url) -> bool {
        let key = normalize_url(locator.as_str())
            .map(String::from)
            .unwrap_or_else(|_| locator.to_string());
        self.seen.insert(key)
    }

    fn enqueue_links(&mut self, links: &[Url]) {
        let host = self.source.url.host_str();
        let capacity = self.source.config.max_hits as usize;

        for link in links {
            if self.frontier.len() >= capacity {
                break;
            }
            if link.host_str() != host {
                continue;
            }
            let Ok(normalized) = normalize_url(link.as_str()) else {
                continue;
            };
            if !self.seen.contains(normalized.as_str()) && !self.frontier.contains(link) {
                self.frontier.push_back(link.clone());
            }
        }
    }

    fn checkpoint(&self, cursor: Option<&Cursor>) {
        let Some(cursor) = cursor else {
            return;
        };
        if let Err(e) = self.ctx.store.save_checkpoint(&self.source.id, cursor) {
            tracing::warn!(source_id = %self.source.id, "Failed to save checkpoint: {}", e);
        }
    }

    /// Walks one item through robots, politeness, fetch and retry
    async fn process_item(&mut self, locator: &Url) -> ItemResult {
        let config = &self.source.config;
        let timeout = config.retry_policy.timeout;
        let mut interval = config.request_interval();

        if config.respect_robots {
            let verdict = self
                .ctx
                .politeness
                .check_robots(&mut self.robots, self.ctx.fetcher.as_ref(), locator, timeout)
                .await;
            if verdict == RobotsVerdict::Disallowed {
                return ItemResult::Disallowed;
            }
            interval = effective_interval(interval, self.robots.crawl_delay(locator));
        }

        let mut attempt = 0;
        loop {
            self.ctx.politeness.acquire(&self.source.id, interval).await;
            let response = self.ctx.fetcher.fetch(locator, timeout).await;
            let outcome = response.outcome.clone();

            self.session.bytes_downloaded += response.body.as_ref().map_or(0, |b| b.len() as u64);
            self.session.outcomes.push(outcome.clone());

            let body_signal = outcome
                .body_signature
                .as_deref()
                .and_then(|text| self.ctx.classifier.classify(text));

            match self.cell.observe(&outcome, body_signal) {
                BlockVerdict::Blocked(signal) => return ItemResult::Blocked(signal),
                BlockVerdict::Suspected { count, signal } => {
                    tracing::debug!(
                        source_id = %self.source.id,
                        "Block suspected ({}), suspicion count {}",
                        signal,
                        count
                    );
                    // A challenge page served with 2xx is not content
                    if outcome.is_2xx() {
                        return ItemResult::Failed(format!("challenge page: {}", signal));
                    }
                }
                BlockVerdict::Proceed => {}
            }

            match outcome.status_class {
                StatusClass::Success => {
                    let Some(body) = response.body else {
                        return ItemResult::Failed("empty response body".to_string());
                    };
                    let final_url = response.final_url.unwrap_or_else(|| locator.clone());
                    return self.store_document(&final_url, &body);
                }
                StatusClass::TransientError => match self.policy.decide(attempt, &outcome) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::debug!(
                            "Retrying {} in {:?} (retry {}/{})",
                            locator,
                            delay,
                            attempt + 1,
                            self.policy.max_retries()
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Abort(reason) => {
                        return ItemResult::Failed(format!("{} ({})", describe(&outcome), reason));
                    }
                },
                StatusClass::Blocked | StatusClass::TerminalError => {
                    return ItemResult::Failed(describe(&outcome));
                }
            }
        }
    }

    fn store_document(&self, locator: &Url, body: &[u8]) -> ItemResult {
        let document = match self.ctx.parser.parse(&self.source, locator, body) {
            Ok(document) => document,
            Err(e) => return ItemResult::Failed(e.to_string()),
        };

        match self.ctx.store.save(&self.source.id, &document) {
            Ok(id) => {
                tracing::trace!("Stored {} as document {}", locator, id);
                ItemResult::Stored(document)
            }
            Err(e) => ItemResult::Failed(format!("storage: {}", e)),
        }
    }
}

fn describe(outcome: &FetchOutcome) -> String {
    match outcome.http_status {
        Some(status) => format!("HTTP {}", status),
        None => format!("{} without response", outcome.status_class.as_str()),
    }
}

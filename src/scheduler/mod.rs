//! Cron scheduler
//!
//! Evaluates every source's cron expression once per tick and hands due
//! sources to the crawl manager. A source fires at most once per tick window
//! `(last_tick, now]`; whether it actually runs is decided by the worker right
//! before dispatch, so a source that is still running is skipped, never
//! queued twice into a parallel session.

use crate::crawler::CrawlManager;
use crate::source::Source;
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Schedule of one source, as listed to operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub source_id: String,
    pub name: String,
    pub frequency: String,
    pub enabled: bool,
    pub running: bool,
    /// Next firing minute, `None` when disabled or never firing
    pub next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    manager: CrawlManager,
    tick_interval: Duration,
    last_tick: Mutex<DateTime<Utc>>,
    /// Operator overrides of the configured `enabled` flag
    enabled: DashMap<String, bool>,
}

impl Scheduler {
    pub fn new(manager: CrawlManager, tick_interval: Duration) -> Self {
        Self::starting_at(manager, tick_interval, Utc::now())
    }

    /// Scheduler whose first window opens at `start`
    pub fn starting_at(manager: CrawlManager, tick_interval: Duration, start: DateTime<Utc>) -> Self {
        Self {
            manager,
            tick_interval,
            last_tick: Mutex::new(start),
            enabled: DashMap::new(),
        }
    }

    /// Evaluates all sources for the window since the previous tick
    ///
    /// # Returns
    ///
    /// Ids of the sources whose jobs were enqueued
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let from = {
            let mut last = self.last_tick.lock();
            if now <= *last {
                return Vec::new();
            }
            std::mem::replace(&mut *last, now)
        };

        let mut submitted = Vec::new();
        for source in self.manager.registry().sources() {
            if !self.is_enabled(&source) {
                continue;
            }
            if !source.config.frequency.fires_between(&from, &now) {
                continue;
            }
            if self.manager.is_running(&source.id) {
                tracing::debug!(source_id = %source.id, "Due but still running, skipped");
                continue;
            }

            match self.manager.submit_scheduled(&source.id) {
                Ok(()) => {
                    tracing::info!(source_id = %source.id, "Scheduled crawl triggered");
                    submitted.push(source.id);
                }
                Err(e) => tracing::warn!(source_id = %source.id, "Scheduled crawl not queued: {}", e),
            }
        }

        submitted
    }

    /// Ticks every `tick_interval` until `shutdown` flips to true or closes
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Scheduler running, tick every {:?}", self.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Enables or disables cron triggering for a source
    ///
    /// Manual starts are unaffected.
    pub fn set_enabled(&self, source_id: &str, enabled: bool) -> Result<()> {
        if self.manager.registry().source(source_id).is_none() {
            return Err(HarvestError::UnknownSource(source_id.to_string()));
        }
        self.enabled.insert(source_id.to_string(), enabled);
        Ok(())
    }

    pub fn job_info(&self, source_id: &str) -> Result<JobInfo> {
        self.manager
            .registry()
            .source(source_id)
            .map(|source| self.describe(&source, Utc::now()))
            .ok_or_else(|| HarvestError::UnknownSource(source_id.to_string()))
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let now = Utc::now();
        self.manager
            .registry()
            .sources()
            .iter()
            .map(|source| self.describe(source, now))
            .collect()
    }

    fn is_enabled(&self, source: &Source) -> bool {
        self.enabled
            .get(&source.id)
            .map(|flag| *flag)
            .unwrap_or(source.config.enabled)
    }

    fn describe(&self, source: &Source, now: DateTime<Utc>) -> JobInfo {
        let enabled = self.is_enabled(source);
        JobInfo {
            source_id: source.id.clone(),
            name: source.name.clone(),
            frequency: source.config.frequency.to_string(),
            enabled,
            running: self.manager.is_running(&source.id),
            next_run: if enabled {
                source.config.frequency.next_after(&now)
            } else {
                None
            },
        }
    }
}

//! Integration tests for cron triggering through the worker pool

mod common;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::crawler::{FetchOutcome, FetchResponse, Fetcher, ManagerSettings};
use sumi_harvest::cron::CronExpr;
use sumi_harvest::storage::Store;
use sumi_harvest::{EndReason, Scheduler, SourceStatus};
use tokio::sync::{watch, Semaphore};
use url::Url;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
}

/// Waits until every submitted job has been taken by a worker
async fn drain_queue(h: &Harness) {
    let manager = h.manager.clone();
    wait_until(Duration::from_secs(5), move || {
        manager.overview().queued_jobs == 0
    })
    .await;
}

#[tokio::test]
async fn test_due_sources_run_to_completion() {
    let mut hourly = create_test_source("hourly", 600, 5);
    hourly.config.frequency = CronExpr::parse("0 * * * *").unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let h = harness(
        vec![create_test_source("minutely", 600, 5), hourly],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 2 }),
    );
    let scheduler = Scheduler::starting_at(h.manager.clone(), Duration::from_secs(60), at(9, 15, 30));

    assert_eq!(scheduler.tick(at(9, 16, 30)), vec!["minutely".to_string()]);
    h.manager.wait_idle("minutely").await.unwrap();

    let status = h.manager.status("minutely").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.last_run.unwrap().end_reason, EndReason::Exhausted);
    assert!(h.store.runs_for("hourly", 10).unwrap().is_empty());

    // The top of the hour fires both
    let mut fired = scheduler.tick(at(10, 0, 0));
    fired.sort();
    assert_eq!(fired, vec!["hourly".to_string(), "minutely".to_string()]);
    h.manager.wait_idle("hourly").await.unwrap();
    h.manager.wait_idle("minutely").await.unwrap();
    assert_eq!(h.store.runs_for("hourly", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_double_trigger_yields_one_session() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(ScriptedFetcher::gated(Arc::clone(&gate)));
    let h = harness(
        vec![create_test_source("blog", 600, 5)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 3 }),
    );
    let scheduler = Scheduler::starting_at(h.manager.clone(), Duration::from_secs(60), at(9, 15, 30));

    h.manager.start("blog").unwrap();

    // The tick sees the session and does not enqueue
    assert!(scheduler.tick(at(9, 16, 30)).is_empty());

    // A job that slips past the tick check is rejected by the worker claim
    h.manager.submit_scheduled("blog").unwrap();
    drain_queue(&h).await;
    assert_eq!(h.manager.active_sessions(), 1);

    gate.add_permits(100);
    h.manager.wait_idle("blog").await.unwrap();

    assert_eq!(h.store.runs_for("blog", 10).unwrap().len(), 1);
    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(h.store.saves(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_source_is_not_rescheduled() {
    let fetcher = Arc::new(ScriptedFetcher::new().default_reply(Reply::Status(403)));
    let h = harness(
        vec![create_test_source("blog", 60, 5)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 5 }),
    );
    let scheduler = Scheduler::starting_at(h.manager.clone(), Duration::from_secs(60), at(9, 15, 30));

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Blocked);
    assert_eq!(fetcher.call_count(), 3);

    // Still submitted: the worker's claim is what refuses a blocked source
    assert_eq!(scheduler.tick(at(9, 16, 30)), vec!["blog".to_string()]);
    drain_queue(&h).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Blocked);
    assert_eq!(h.store.runs_for("blog", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_disabled_sources_are_not_submitted() {
    let mut off = create_test_source("off", 600, 5);
    off.config.enabled = false;
    let h = harness(
        vec![
            create_test_source("a", 600, 5),
            create_test_source("b", 600, 5),
            off,
        ],
        Arc::new(ScriptedFetcher::new()),
        Arc::new(CountingEnumerator { items: 1 }),
    );
    let scheduler = Scheduler::starting_at(h.manager.clone(), Duration::from_secs(60), at(9, 15, 30));

    scheduler.set_enabled("b", false).unwrap();
    assert_eq!(scheduler.tick(at(9, 16, 30)), vec!["a".to_string()]);
    h.manager.wait_idle("a").await.unwrap();

    assert_eq!(h.store.runs_for("a", 10).unwrap().len(), 1);
    assert!(h.store.runs_for("b", 10).unwrap().is_empty());
    assert!(h.store.runs_for("off", 10).unwrap().is_empty());

    // Manual starts ignore the schedule flag
    h.manager.start("off").unwrap();
    h.manager.wait_idle("off").await.unwrap();
    assert_eq!(h.store.runs_for("off", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_loop_fires_and_shuts_down() {
    let h = harness(
        vec![create_test_source("blog", 600, 5)],
        Arc::new(ScriptedFetcher::new()),
        Arc::new(CountingEnumerator { items: 2 }),
    );
    let scheduler = Arc::new(Scheduler::starting_at(
        h.manager.clone(),
        Duration::from_secs(3600),
        Utc::now() - chrono::Duration::minutes(2),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    // The first interval tick is immediate and covers the last two minutes
    let store = Arc::clone(&h.store);
    wait_until(Duration::from_secs(5), move || {
        store.runs_for("blog", 10).map(|r| r.len()).unwrap_or(0) == 1
    })
    .await;

    shutdown_tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    h.manager.wait_idle("blog").await.unwrap();
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Completed);
}

#[tokio::test]
async fn test_cron_leaves_paused_source_for_resume() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(ScriptedFetcher::gated(Arc::clone(&gate)));
    let h = harness(
        vec![create_test_source("blog", 600, 100)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 6 }),
    );
    let scheduler = Scheduler::starting_at(h.manager.clone(), Duration::from_secs(60), at(9, 15, 30));

    h.manager.start("blog").unwrap();
    gate.add_permits(2);
    let store = Arc::clone(&h.store);
    wait_until(Duration::from_secs(10), move || {
        store.count_documents("blog").unwrap_or(0) == 2
    })
    .await;
    h.manager.pause("blog").unwrap();
    gate.add_permits(1);
    h.manager.wait_idle("blog").await.unwrap();

    let paused = h.manager.status("blog").unwrap();
    assert_eq!(paused.status, SourceStatus::Paused);
    let checkpoint = h.store.load_checkpoint("blog").unwrap().unwrap();
    let calls_before = fetcher.call_count();

    // The trigger reaches the worker, which leaves the source alone
    gate.add_permits(100);
    assert_eq!(scheduler.tick(at(9, 16, 30)), vec!["blog".to_string()]);
    drain_queue(&h).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(fetcher.call_count(), calls_before);
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Paused);
    assert_eq!(h.store.load_checkpoint("blog").unwrap(), Some(checkpoint));

    h.manager.resume("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Completed);
    assert_eq!(h.store.count_documents("blog").unwrap(), 6);
    let mut paths = fetcher.paths();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), fetcher.call_count());
    assert_eq!(h.store.runs_for("blog", 10).unwrap().len(), 2);
}

/// Holds every fetch on a gate and tracks how many sessions are fetching
struct HostTracker {
    gate: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    hosts: Mutex<Vec<String>>,
}

impl HostTracker {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            hosts: Mutex::new(Vec::new()),
        }
    }

    /// Hosts in the order their first fetch arrived
    fn hosts(&self) -> Vec<String> {
        self.hosts.lock().clone()
    }
}

#[async_trait]
impl Fetcher for HostTracker {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> FetchResponse {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        {
            let host = url.host_str().unwrap_or_default().to_string();
            let mut hosts = self.hosts.lock();
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let body = format!("Page of {}", url).into_bytes();
        FetchResponse {
            outcome: FetchOutcome::from_status(200, Duration::ZERO, Some(&body)),
            body: Some(body),
            final_url: Some(url.clone()),
        }
    }
}

fn host_sources(count: usize) -> Vec<sumi_harvest::Source> {
    (0..count)
        .map(|i| {
            create_source_at(
                &format!("s{}", i),
                &format!("https://s{}.harvest.test", i),
                600,
                5,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_worker_cap_holds_and_queue_is_fifo() {
    let tracker = Arc::new(HostTracker::new());
    let settings = ManagerSettings {
        max_workers: 2,
        ..ManagerSettings::default()
    };
    let h = harness_with_settings(
        host_sources(5),
        settings,
        tracker.clone(),
        Arc::new(CountingEnumerator { items: 1 }),
    );

    for i in 0..5 {
        h.manager.start(&format!("s{}", i)).unwrap();
    }

    let waiting = Arc::clone(&tracker);
    wait_until(Duration::from_secs(5), move || {
        waiting.in_flight.load(Ordering::SeqCst) == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut first_two = tracker.hosts();
    first_two.sort();
    assert_eq!(first_two, vec!["s0.harvest.test", "s1.harvest.test"]);
    assert_eq!(h.manager.overview().queued_jobs, 3);

    // Each released fetch frees a worker for the next queued source
    for next in 2..5 {
        tracker.gate.add_permits(1);
        let seen = Arc::clone(&tracker);
        wait_until(Duration::from_secs(5), move || seen.hosts().len() == next + 1).await;
        assert_eq!(tracker.hosts()[next], format!("s{}.harvest.test", next));
        assert!(tracker.in_flight.load(Ordering::SeqCst) <= 2);
    }

    tracker.gate.add_permits(100);
    for i in 0..5 {
        h.manager.wait_idle(&format!("s{}", i)).await.unwrap();
    }

    assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
    assert_eq!(h.manager.active_sessions(), 0);
    for i in 0..5 {
        let runs = h.store.runs_for(&format!("s{}", i), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].end_reason, EndReason::Exhausted);
    }
}

#[tokio::test]
async fn test_single_worker_runs_sources_in_submission_order() {
    let tracker = Arc::new(HostTracker::new());
    tracker.gate.add_permits(100);
    let settings = ManagerSettings {
        max_workers: 1,
        ..ManagerSettings::default()
    };
    let h = harness_with_settings(
        host_sources(4),
        settings,
        tracker.clone(),
        Arc::new(CountingEnumerator { items: 2 }),
    );

    for id in ["s2", "s0", "s3", "s1"] {
        h.manager.submit_scheduled(id).unwrap();
    }
    for id in ["s0", "s1", "s2", "s3"] {
        let store = Arc::clone(&h.store);
        wait_until(Duration::from_secs(5), move || {
            store.runs_for(id, 10).map(|r| r.len()).unwrap_or(0) == 1
        })
        .await;
    }

    assert_eq!(
        tracker.hosts(),
        vec![
            "s2.harvest.test",
            "s0.harvest.test",
            "s3.harvest.test",
            "s1.harvest.test"
        ]
    );
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
}

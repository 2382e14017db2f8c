//! Integration tests for crawl sessions
//!
//! These tests drive the crawl manager with scripted fetchers and
//! enumerators over a real SQLite store, plus one end-to-end run against a
//! wiremock server.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::blocking::PatternClassifier;
use sumi_harvest::crawler::{HttpFetcher, ParsedDocument, Parser};
use sumi_harvest::config::UserAgentConfig;
use sumi_harvest::source::Source;
use sumi_harvest::storage::Store;
use sumi_harvest::{EndReason, HarvestError, SourceStatus};
use tokio::sync::Semaphore;
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(ScriptedFetcher::gated(Arc::clone(&gate)));
    let h = harness(
        vec![create_test_source("blog", 300, 10)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 2 }),
    );

    h.manager.start("blog").unwrap();
    for _ in 0..8 {
        assert!(matches!(
            h.manager.start("blog"),
            Err(HarvestError::AlreadyRunning { .. })
        ));
    }
    assert_eq!(h.manager.active_sessions(), 1);

    gate.add_permits(100);
    h.manager.wait_idle("blog").await.unwrap();

    assert_eq!(h.store.runs_for("blog", 10).unwrap().len(), 1);
    assert_eq!(fetcher.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_hits_is_exact() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let h = harness(
        vec![create_test_source("blog", 60, 3)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 10 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 3);

    let run = status.last_run.unwrap();
    assert_eq!(run.end_reason, EndReason::MaxHitsReached);
    assert_eq!(run.hits_collected, 3);
    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(h.store.saves(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_three_429s_block_the_source() {
    let fetcher = Arc::new(ScriptedFetcher::new().default_reply(Reply::Status(429)));
    let h = harness(
        vec![create_test_source("blog", 60, 10)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 10 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Blocked);
    assert_eq!(status.last_block_reason.as_deref(), Some("HTTP_429_RATE_LIMIT"));
    assert_eq!(status.last_run.unwrap().end_reason, EndReason::Blocked);
    assert_eq!(fetcher.call_count(), 3);

    // Blocked is sticky: neither a manual start nor a cron trigger runs it
    assert!(matches!(
        h.manager.start("blog"),
        Err(HarvestError::InvalidTransition { .. })
    ));
    h.manager.submit_scheduled("blog").unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(fetcher.call_count(), 3);
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Blocked);
    assert_eq!(h.store.runs_for("blog", 10).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_rearms_blocked_source() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .script("/item/0", vec![Reply::Status(403)])
            .script("/item/1", vec![Reply::Status(403)])
            .script("/item/2", vec![Reply::Status(403)]),
    );
    let h = harness(
        vec![create_test_source("blog", 60, 10)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 4 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Blocked);

    h.manager.resume("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    // The blocking item was not checkpointed, so resume retries it
    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 2);
    assert_eq!(
        fetcher.paths(),
        vec!["/item/0", "/item/1", "/item/2", "/item/2", "/item/3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_follow_backoff_schedule() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("/item/0", vec![Reply::Timeout, Reply::Timeout, Reply::Status(200)]),
    );
    let h = harness(
        vec![create_test_source("blog", 60, 10)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 1 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 3);
    // base delay 1s, factor 2: waits of 1s then 2s
    assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(1));
    assert_eq!(calls[2].1 - calls[1].1, Duration::from_secs(2));

    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 1);
    assert_eq!(status.last_run.unwrap().end_reason, EndReason::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_503_blocks_before_retries_run_out() {
    let fetcher = Arc::new(ScriptedFetcher::new().script("/item/0", vec![Reply::Status(503); 4]));
    let h = harness(
        vec![create_test_source("blog", 60, 10)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 2 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Blocked);
    assert_eq!(
        status.last_block_reason.as_deref(),
        Some("HTTP_503_SERVICE_UNAVAILABLE")
    );
    assert_eq!(fetcher.paths(), vec!["/item/0"; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_404s_block_the_source() {
    let fetcher = Arc::new(ScriptedFetcher::new().default_reply(Reply::Status(404)));
    let h = harness(
        vec![create_test_source("blog", 60, 50)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 20 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    // Non-2xx responses become suspicious from the third in a row
    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Blocked);
    assert_eq!(status.last_block_reason.as_deref(), Some("REPEATED_NON_2XX"));
    assert_eq!(fetcher.call_count(), 5);

    let run = status.last_run.unwrap();
    assert_eq!(run.hits_collected, 0);
    assert_eq!(run.pages_failed, 4);
}

#[tokio::test(start_paused = true)]
async fn test_failure_ceiling_fails_session() {
    let fetcher = Arc::new(ScriptedFetcher::new().default_reply(Reply::Timeout));
    let mut source = create_test_source("blog", 60, 50);
    source.config.retry_policy.max_retries = 0;
    let h = harness(
        vec![source],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 20 }),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    // Ceiling of 5: the sixth consecutive failure ends the session
    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Failed);
    assert_eq!(status.consecutive_failures, 6);
    assert_eq!(fetcher.call_count(), 6);

    let run = status.last_run.unwrap();
    assert_eq!(run.end_reason, EndReason::Failed);
    assert_eq!(run.pages_failed, 6);
    assert!(run.error.unwrap().contains("6 consecutive item failures"));
}

#[tokio::test(start_paused = true)]
async fn test_challenge_page_with_2xx_is_not_stored() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let h = harness_with(
        vec![create_test_source("blog", 60, 10)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 3 }),
        |c| {
            c.with_classifier(Arc::new(PatternClassifier::with_patterns(
                &[r"Content of /item/1\b"],
                &[],
            )))
        },
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    let status = h.manager.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 2);
    assert_eq!(h.store.saves(), 2);

    let run = status.last_run.unwrap();
    assert_eq!(run.pages_failed, 1);
    assert!(run.error.unwrap().contains("challenge page: CAPTCHA"));
}

/// Emits fixed links for the first item only
struct LinkingParser;

impl Parser for LinkingParser {
    fn parse(
        &self,
        _source: &Source,
        locator: &Url,
        body: &[u8],
    ) -> sumi_harvest::Result<ParsedDocument> {
        let links = if locator.path() == "/item/0" {
            vec![
                locator.join("/page/a")?,
                locator.join("/page/b#top")?,
                locator.join("/page/a")?,
                Url::parse("https://elsewhere.test/page/c")?,
            ]
        } else {
            Vec::new()
        };

        Ok(ParsedDocument {
            locator: locator.to_string(),
            title: None,
            content: String::from_utf8_lossy(body).into_owned(),
            links,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_follow_links_stays_on_source_host() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let mut source = create_test_source("blog", 60, 10);
    source.config.follow_links = true;
    let h = harness_with(
        vec![source],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 2 }),
        |c| c.with_parser(Arc::new(LinkingParser)),
    );

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    // Followed links go ahead of the next enumerated item
    assert_eq!(
        fetcher.paths(),
        vec!["/item/0", "/page/a", "/page/b", "/item/1"]
    );
    assert_eq!(h.manager.status("blog").unwrap().hits_so_far, 4);
    assert_eq!(
        h.store.load_checkpoint("blog").unwrap().unwrap().as_str(),
        "2"
    );
}

#[tokio::test]
async fn test_pause_then_resume_continues_from_cursor() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(ScriptedFetcher::gated(Arc::clone(&gate)));
    let h = harness(
        vec![create_test_source("blog", 300, 100)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 6 }),
    );

    h.manager.start("blog").unwrap();
    gate.add_permits(2);
    let store = Arc::clone(&h.store);
    wait_until(Duration::from_secs(10), || {
        store.count_documents("blog").unwrap_or(0) == 2
    })
    .await;

    h.manager.pause("blog").unwrap();
    gate.add_permits(1);
    h.manager.wait_idle("blog").await.unwrap();

    let paused = h.manager.status("blog").unwrap();
    assert_eq!(paused.status, SourceStatus::Paused);
    let first_run = paused.last_run.unwrap();
    assert_eq!(first_run.end_reason, EndReason::PausedByOperator);
    let stored_before = first_run.hits_collected;
    assert!((2..=3).contains(&stored_before));
    assert_eq!(
        h.store.load_checkpoint("blog").unwrap().unwrap().as_str(),
        stored_before.to_string()
    );

    gate.add_permits(100);
    h.manager.resume("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    let finished = h.manager.status("blog").unwrap();
    assert_eq!(finished.status, SourceStatus::Completed);
    assert_eq!(finished.hits_so_far, 6 - stored_before);
    assert_eq!(h.store.count_documents("blog").unwrap(), 6);

    // Every item fetched exactly once across both sessions
    let mut paths = fetcher.paths();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), fetcher.call_count());
    assert_eq!(h.store.runs_for("blog", 10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_resume_requires_paused_source() {
    let h = harness(
        vec![create_test_source("blog", 300, 1)],
        Arc::new(ScriptedFetcher::new()),
        Arc::new(CountingEnumerator { items: 1 }),
    );

    assert!(matches!(
        h.manager.resume("blog"),
        Err(HarvestError::NoSuchSession { .. })
    ));

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();
    assert!(matches!(
        h.manager.resume("blog"),
        Err(HarvestError::NoSuchSession { .. })
    ));
}

#[tokio::test]
async fn test_fresh_start_ignores_checkpoint() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let h = harness(
        vec![create_test_source("blog", 300, 100)],
        fetcher.clone(),
        Arc::new(CountingEnumerator { items: 3 }),
    );
    h.store
        .save_checkpoint("blog", &sumi_harvest::crawler::Cursor::new("2"))
        .unwrap();

    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();

    assert_eq!(fetcher.call_count(), 3);
}

fn test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

#[tokio::test]
async fn test_end_to_end_against_http_server() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+$"))
        .respond_with(|request: &wiremock::Request| {
            ResponseTemplate::new(200).set_body_string(format!(
                "<html><head><title>{0}</title></head><body><p>Article at {0}</p></body></html>",
                request.url.path()
            ))
        })
        .expect(5)
        .mount(&server)
        .await;

    let mut source = create_source_at("site", &server.uri(), 60, 5);
    source.content_type = sumi_harvest::ContentType::Html;
    source.config.respect_robots = true;

    let h = harness(
        vec![source],
        Arc::new(HttpFetcher::new(&test_user_agent()).unwrap()),
        Arc::new(CountingEnumerator { items: 5 }),
    );

    let started = std::time::Instant::now();
    h.manager.start("site").unwrap();
    h.manager.wait_idle("site").await.unwrap();

    // Five requests at one per second
    assert!(started.elapsed() >= Duration::from_secs(4));

    let status = h.manager.status("site").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 5);
    assert_eq!(h.store.saves(), 5);

    let runs = h.store.runs_for("site", 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(matches!(
        runs[0].end_reason,
        EndReason::MaxHitsReached | EndReason::Exhausted
    ));
    assert_eq!(runs[0].hits_collected, 5);
    assert!(runs[0].bytes_downloaded > 0);

    let published = h.registry.runtime("site").unwrap();
    assert_eq!(published.status, SourceStatus::Completed);
}

#[tokio::test]
async fn test_robots_disallowed_items_are_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /item/1\n"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/item/[02]$"))
        .respond_with(|request: &wiremock::Request| {
            ResponseTemplate::new(200).set_body_string(format!("text of {}", request.url.path()))
        })
        .mount(&server)
        .await;

    let mut source = create_source_at("site", &server.uri(), 300, 10);
    source.config.respect_robots = true;

    let h = harness(
        vec![source],
        Arc::new(HttpFetcher::new(&test_user_agent()).unwrap()),
        Arc::new(CountingEnumerator { items: 3 }),
    );
    let manager = &h.manager;
    let store = &h.store;

    manager.start("site").unwrap();
    manager.wait_idle("site").await.unwrap();

    let status = manager.status("site").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 2);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(store.count_documents("site").unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_status_survives_restart() {
    let h = harness(
        vec![create_test_source("blog", 60, 10)],
        Arc::new(ScriptedFetcher::new().default_reply(Reply::Status(403))),
        Arc::new(CountingEnumerator { items: 4 }),
    );
    h.manager.start("blog").unwrap();
    h.manager.wait_idle("blog").await.unwrap();
    assert_eq!(h.manager.status("blog").unwrap().status, SourceStatus::Blocked);

    let fetcher = Arc::new(ScriptedFetcher::new());
    let restarted = h.reopen(fetcher.clone(), Arc::new(CountingEnumerator { items: 4 }));

    let status = restarted.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Blocked);
    assert_eq!(status.last_block_reason.as_deref(), Some("HTTP_403_FORBIDDEN"));
    assert!(!status.active);

    // Still sticky in the new process
    assert!(matches!(
        restarted.start("blog"),
        Err(HarvestError::InvalidTransition { .. })
    ));
    restarted.submit_scheduled("blog").unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.call_count(), 0);

    restarted.resume("blog").unwrap();
    restarted.wait_idle("blog").await.unwrap();

    let status = restarted.status("blog").unwrap();
    assert_eq!(status.status, SourceStatus::Completed);
    assert_eq!(status.hits_so_far, 2);
    assert_eq!(fetcher.paths(), vec!["/item/2", "/item/3"]);
}

#[tokio::test]
async fn test_paused_source_resumes_after_restart() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(
        vec![create_test_source("blog", 600, 100)],
        Arc::new(ScriptedFetcher::gated(Arc::clone(&gate))),
        Arc::new(CountingEnumerator { items: 5 }),
    );

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
    let stored_before = h.store.count_documents("blog").unwrap() as usize;

    let fetcher = Arc::new(ScriptedFetcher::new());
    let restarted = h.reopen(fetcher.clone(), Arc::new(CountingEnumerator { items: 5 }));
    assert_eq!(restarted.status("blog").unwrap().status, SourceStatus::Paused);

    restarted.resume("blog").unwrap();
    restarted.wait_idle("blog").await.unwrap();

    assert_eq!(restarted.status("blog").unwrap().status, SourceStatus::Completed);
    assert_eq!(restarted.store().count_documents("blog").unwrap(), 5);
    assert_eq!(fetcher.call_count(), 5 - stored_before);
    assert_eq!(fetcher.paths()[0], format!("/item/{}", stored_before));
}

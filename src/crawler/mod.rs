//! Crawler module: external contracts and the session machinery
//!
//! This module contains:
//! - the Fetcher, Enumerator and Parser contracts with their built-in implementations
//! - the per-source fetch loop
//! - the worker pool that runs sessions
//! - the Crawl Manager handle operators and the scheduler talk to

mod enumerator;
mod fetcher;
mod manager;
mod parser;
mod pool;
mod session;

pub use enumerator::{CandidateItem, Cursor, Enumerator, ItemStream, ListStream, SeedEnumerator};
pub use fetcher::{
    body_signature, build_http_client, FetchOutcome, FetchResponse, Fetcher, HttpFetcher,
    StatusClass,
};
pub use manager::{Collaborators, CrawlManager, ManagerSettings, Overview, StatusSnapshot};
pub use parser::{parse_html, HtmlParser, ParsedDocument, Parser, ParserSet, TextParser};
pub use pool::Job;
pub use session::{CrawlSession, SessionLimits};

//! URL helpers
//!
//! `normalize_url` produces the key used to deduplicate followed links within
//! a session. The fetched URL is always the one the document pointed to; the
//! normalized form is never sent over the wire.

use crate::{UrlError, UrlResult};
use url::Url;

/// Query parameters that never change what a page serves
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "ref", "source"];

/// Normalizes a URL for deduplication
///
/// - only http and https are accepted
/// - host is lowercased, default ports dropped
/// - `.` and `..` segments and repeated slashes are collapsed
/// - trailing slash removed except for the root path
/// - fragment removed
/// - tracking parameters (`utm_*` and friends) removed, the rest sorted
///
/// ```
/// use sumi_harvest::url::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM/a/./b/?utm_source=x&z=1&a=2#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a/b?a=2&z=1");
/// ```
pub fn normalize_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .map(str::to_lowercase)
        .ok_or(UrlError::MissingHost)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(e.to_string()))?;

    let path = collapse_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Lowercased host of a URL
///
/// ```
/// use sumi_harvest::url::extract_host;
/// use url::Url;
///
/// let url = Url::parse("https://Blog.Example.com:8443/post").unwrap();
/// assert_eq!(extract_host(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(str::to_lowercase)
}

fn collapse_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

//! Recover the query identifier that addresses the continuation endpoint.
//!
//! The profile HTML preloads a script bundle. That bundle contains several
//! `"queryId":"<32 chars>"` literals; the one for the timeline query is the
//! second occurrence.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::http_client::HttpClient;
use crate::types::{CrawlError, CrawlResult};

/// Length of a query identifier.
pub const REQUEST_ID_LEN: usize = 32;

fn query_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""queryId":"(.{32})""#).expect("valid regex"))
}

/// Find the preloaded script bundle in the profile HTML and make its URL absolute.
pub fn find_script_url(html: &str, page_url: &str) -> CrawlResult<String> {
    let document = Html::parse_document(html);

    let mut href = None;
    for css in [r#"link[rel="preload"][as="script"]"#, r#"link[as="script"]"#] {
        let selector = Selector::parse(css)
            .map_err(|e| CrawlError::RequestIdNotFound(format!("bad selector {css}: {e:?}")))?;
        href = document
            .select(&selector)
            .find_map(|el| el.value().attr("href"))
            .filter(|h| !h.trim().is_empty())
            .map(|h| h.trim().to_string());
        if href.is_some() {
            break;
        }
    }

    let href = href.ok_or_else(|| {
        CrawlError::RequestIdNotFound("no preloaded script link in profile page".into())
    })?;

    let base = url::Url::parse(page_url)
        .map_err(|e| CrawlError::RequestIdNotFound(format!("bad page URL {page_url}: {e}")))?;
    let resolved = base
        .join(&href)
        .map_err(|e| CrawlError::RequestIdNotFound(format!("bad script href {href}: {e}")))?;
    Ok(resolved.to_string())
}

/// Pick the request identifier out of a script body.
///
/// The first match belongs to an unrelated query and is skipped.
pub fn extract_request_id(script: &str) -> CrawlResult<String> {
    let matches: Vec<&str> = query_id_pattern()
        .captures_iter(script)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .take(2)
        .collect();

    match matches.get(1) {
        Some(id) => Ok(id.to_string()),
        None => Err(CrawlError::RequestIdNotFound(format!(
            "expected at least 2 queryId matches, found {}",
            matches.len()
        ))),
    }
}

/// Locate, fetch and scan the script bundle referenced by the profile page.
pub async fn resolve_request_id(
    client: &HttpClient,
    html: &str,
    page_url: &str,
) -> CrawlResult<String> {
    let script_url = find_script_url(html, page_url)?;
    tracing::debug!("Fetching script bundle {script_url}");

    let resp = client.get(&script_url, &[]).await.map_err(|e| {
        tracing::warn!("Script bundle fetch failed: {e}");
        CrawlError::RequestIdNotFound(format!("script fetch failed: {e}"))
    })?;

    let id = extract_request_id(&resp.text())?;
    tracing::debug!("Resolved request id {id}");
    Ok(id)
}

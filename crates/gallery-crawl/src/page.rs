//! Decoders for the two page schemas.
//!
//! The first page is a JSON document embedded in an inline `<script>` of the
//! server-rendered profile HTML. Every following page is the raw body of a
//! `graphql/query` response. The two shapes differ in nesting and in the name
//! of the timestamp field, but both end up as a [`Page`].

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::types::{CrawlError, CrawlResult, InitialPage, MediaEntry, Page, PagePayload};

/// Selector for the inline script holding the embedded profile document.
const INITIAL_DATA_SCRIPT: &str = "body > script:first-of-type";

#[derive(Debug, Deserialize)]
struct PageInfo {
    end_cursor: Option<String>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Dimensions {
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

// ── initial schema ──────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InitialDocument {
    #[serde(default)]
    rhx_gis: String,
    entry_data: EntryData,
}

#[derive(Debug, Deserialize)]
struct EntryData {
    #[serde(rename = "ProfilePage")]
    profile_page: Vec<ProfilePage>,
}

#[derive(Debug, Deserialize)]
struct ProfilePage {
    graphql: InitialGraphql,
}

#[derive(Debug, Deserialize)]
struct InitialGraphql {
    user: InitialUser,
}

#[derive(Debug, Deserialize)]
struct InitialUser {
    id: String,
    #[serde(rename = "edge_owner_to_timeline_media")]
    media: InitialMedia,
}

#[derive(Debug, Deserialize)]
struct InitialMedia {
    edges: Vec<InitialEdge>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct InitialEdge {
    node: InitialNode,
}

#[derive(Debug, Deserialize)]
struct InitialNode {
    display_url: String,
    thumbnail_src: Option<String>,
    #[serde(default)]
    is_video: bool,
    date: Option<i64>,
    #[serde(default)]
    dimensions: Dimensions,
}

// ── continuation schema ─────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContinuationDocument {
    data: ContinuationData,
}

#[derive(Debug, Deserialize)]
struct ContinuationData {
    user: ContinuationUser,
}

#[derive(Debug, Deserialize)]
struct ContinuationUser {
    #[serde(rename = "edge_owner_to_timeline_media")]
    container: ContinuationMedia,
}

#[derive(Debug, Deserialize)]
struct ContinuationMedia {
    page_info: PageInfo,
    edges: Vec<ContinuationEdge>,
}

#[derive(Debug, Deserialize)]
struct ContinuationEdge {
    node: ContinuationNode,
}

#[derive(Debug, Deserialize)]
struct ContinuationNode {
    display_url: String,
    thumbnail_src: Option<String>,
    #[serde(default)]
    is_video: bool,
    taken_at_timestamp: Option<i64>,
    #[serde(default)]
    dimensions: Dimensions,
}

/// Which endpoint a page body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// Server-rendered profile HTML.
    Profile,
    /// `graphql/query` JSON.
    Continuation,
}

/// Decode a page body with the schema that belongs to its source.
pub fn decode_page(source: PageSource, body: &[u8]) -> CrawlResult<PagePayload> {
    match source {
        PageSource::Profile => {
            parse_initial_page(&String::from_utf8_lossy(body)).map(PagePayload::Initial)
        }
        PageSource::Continuation => parse_continuation_page(body).map(PagePayload::Continuation),
    }
}

/// Decode the profile HTML into the account id, signing seed and first page.
pub fn parse_initial_page(html: &str) -> CrawlResult<InitialPage> {
    let json = embedded_document(html)?;
    let doc: InitialDocument = serde_json::from_str(&json)
        .map_err(|e| CrawlError::MalformedInitialPage(format!("decode failed: {e}")))?;

    let profile = doc
        .entry_data
        .profile_page
        .into_iter()
        .next()
        .ok_or_else(|| CrawlError::MalformedInitialPage("ProfilePage is empty".into()))?;

    let user = profile.graphql.user;
    let nodes = user.media.edges.into_iter().map(|e| {
        let n = e.node;
        media_entry(
            n.display_url,
            n.thumbnail_src,
            n.is_video,
            n.date,
            n.dimensions,
        )
    });

    Ok(InitialPage {
        user_id: user.id,
        seed: doc.rhx_gis,
        page: build_page(nodes, user.media.page_info),
    })
}

/// Decode a `graphql/query` response body into a page.
pub fn parse_continuation_page(body: &[u8]) -> CrawlResult<Page> {
    let doc: ContinuationDocument = serde_json::from_slice(body)
        .map_err(|e| CrawlError::MalformedContinuationPage(e.to_string()))?;

    let media = doc.data.user.container;
    let nodes = media.edges.into_iter().map(|e| {
        let n = e.node;
        media_entry(
            n.display_url,
            n.thumbnail_src,
            n.is_video,
            n.taken_at_timestamp,
            n.dimensions,
        )
    });

    Ok(build_page(nodes, media.page_info))
}

/// Slice the JSON object out of the first body script.
///
/// The script reads `window._sharedData = {...};`, so the object runs from the
/// first `{` up to, but excluding, the final character.
fn embedded_document(html: &str) -> CrawlResult<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(INITIAL_DATA_SCRIPT)
        .map_err(|e| CrawlError::MalformedInitialPage(format!("bad selector: {e:?}")))?;

    let script = document
        .select(&selector)
        .next()
        .ok_or_else(|| CrawlError::MalformedInitialPage("no inline data script".into()))?;
    let text: String = script.text().collect();
    let text = text.trim_end();

    let start = text
        .find('{')
        .ok_or_else(|| CrawlError::MalformedInitialPage("no JSON object in script".into()))?;
    let tail = &text[start..];
    let end = tail.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    if end == 0 {
        return Err(CrawlError::MalformedInitialPage(
            "JSON object is truncated".into(),
        ));
    }
    Ok(tail[..end].to_string())
}

fn media_entry(
    url: String,
    thumbnail_url: Option<String>,
    is_video: bool,
    timestamp: Option<i64>,
    dimensions: Dimensions,
) -> MediaEntry {
    MediaEntry {
        url,
        thumbnail_url,
        is_video,
        captured_at: timestamp.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        width: dimensions.width,
        height: dimensions.height,
    }
}

fn build_page(entries: impl Iterator<Item = MediaEntry>, info: PageInfo) -> Page {
    let mut page = Page {
        cursor: info.end_cursor,
        has_more: info.has_next_page,
        ..Default::default()
    };
    for entry in entries {
        if entry.is_video {
            page.videos_skipped += 1;
        } else {
            page.entries.push(entry);
        }
    }
    page
}

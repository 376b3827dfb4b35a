//! Core data types for a crawl session: media entries, pages, session state, and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single media item discovered on a gallery page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub is_video: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub width: u32,
    pub height: u32,
}

/// One normalized batch of media plus pagination info.
///
/// Both wire schemas decode into this shape. Video entries have already been
/// removed; `videos_skipped` records how many were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub entries: Vec<MediaEntry>,
    pub cursor: Option<String>,
    pub has_more: bool,
    pub videos_skipped: usize,
}

impl Page {
    /// Cursor to continue from, if the server says there is more.
    pub fn next_cursor(&self) -> Option<&str> {
        if self.has_more {
            self.cursor.as_deref().filter(|c| !c.is_empty())
        } else {
            None
        }
    }
}

/// Result of decoding the server-rendered profile page.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialPage {
    pub user_id: String,
    pub seed: String,
    pub page: Page,
}

/// A decoded page, tagged by the endpoint it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum PagePayload {
    Initial(InitialPage),
    Continuation(Page),
}

impl PagePayload {
    pub fn page(&self) -> &Page {
        match self {
            PagePayload::Initial(initial) => &initial.page,
            PagePayload::Continuation(page) => page,
        }
    }

    pub fn into_page(self) -> Page {
        match self {
            PagePayload::Initial(initial) => initial.page,
            PagePayload::Continuation(page) => page,
        }
    }
}

/// Per-crawl state owned by the orchestrator.
///
/// `user_id` and `request_id` are written once while the initial page is
/// processed and never change afterwards.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: uuid::Uuid,
    pub handle: String,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub seed: String,
}

impl SessionState {
    pub fn new(handle: &str) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            handle: handle.to_string(),
            user_id: None,
            request_id: None,
            seed: String::new(),
        }
    }
}

/// Summary of a finished crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub handle: String,
    pub user_id: Option<String>,
    pub pages_fetched: usize,
    pub continuation_requests: usize,
    pub videos_skipped: usize,
    pub downloads_attempted: usize,
    pub files_written: usize,
    pub duplicates: usize,
    pub transport_errors: usize,
    pub ignored_responses: usize,
}

/// Errors that can occur during a crawl.
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("Malformed initial page: {0}")]
    MalformedInitialPage(String),

    #[error("Malformed continuation page: {0}")]
    MalformedContinuationPage(String),

    #[error("Request id not found: {0}")]
    RequestIdNotFound(String),

    #[error("Transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CrawlError {
    /// Whether this error aborts the whole session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CrawlError::Transport { .. })
    }
}

/// Convenience result type.
pub type CrawlResult<T> = Result<T, CrawlError>;

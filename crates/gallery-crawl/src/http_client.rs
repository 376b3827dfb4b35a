//! Async HTTP client wrapping reqwest.
//!
//! Every request carries the headers the gallery API expects from its own
//! web front end. Responses are returned with their content type so callers
//! can dispatch on it.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, REFERER};

use crate::types::{CrawlError, CrawlResult};

/// Fixed desktop browser user agent sent with every request.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/41.0.2228.0 Safari/537.36";

/// Largest response body echoed into a transport error.
const MAX_ERROR_BODY: usize = 512;

/// What a response body is, judged by its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Image,
    Json,
    Other,
}

impl BodyKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let ct = content_type.unwrap_or("").to_ascii_lowercase();
        if ct.contains("image") {
            BodyKind::Image
        } else if ct.contains("json") {
            BodyKind::Json
        } else {
            BodyKind::Other
        }
    }
}

/// Response from a successful GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: Option<String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn kind(&self) -> BodyKind {
        BodyKind::from_content_type(self.content_type.as_deref())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client bound to one account's referer.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client whose requests appear to come from `referer`.
    pub fn new(referer: &str, timeout_ms: u64) -> CrawlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-requested-with",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(referer)
                .map_err(|e| CrawlError::Config(format!("invalid referer {referer}: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| CrawlError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// GET `url`, attaching any extra headers.
    ///
    /// Connection failures and non-success statuses both come back as
    /// [`CrawlError::Transport`].
    pub async fn get(
        &self,
        url: &str,
        extra_headers: &[(&str, String)],
    ) -> CrawlResult<HttpResponse> {
        let mut builder = self.client.get(url);
        for (name, value) in extra_headers {
            builder = builder.header(*name, value.as_str());
        }

        let r = builder.send().await.map_err(|e| CrawlError::Transport {
            url: url.to_string(),
            message: e.to_string(),
            body: String::new(),
        })?;

        let status = r.status();
        let content_type = r
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = r.bytes().await.map_err(|e| CrawlError::Transport {
            url: url.to_string(),
            message: format!("failed to read body: {e}"),
            body: String::new(),
        })?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(CrawlError::Transport {
                url: url.to_string(),
                message: status.to_string(),
                body: text,
            });
        }

        Ok(HttpResponse {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}

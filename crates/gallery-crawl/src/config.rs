//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use crate::types::{CrawlError, CrawlResult};

pub const DEFAULT_BASE_URL: &str = "https://www.instagram.com";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Settings for one crawl session.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Scheme and host of the gallery, without a trailing slash.
    pub base_url: String,
    /// Directory under which `instagram_<handle>/` is created.
    pub output_root: PathBuf,
    /// Items requested per continuation page.
    pub page_size: u32,
    /// Upper bound on downloads in flight.
    pub max_concurrent_downloads: usize,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Stop after this many page fetches.
    pub max_pages: Option<usize>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_root: PathBuf::from("."),
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent_downloads: DEFAULT_CONCURRENCY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_pages: None,
        }
    }
}

impl CrawlConfig {
    /// Defaults overlaid with `GALLERY_CRAWL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(base) = std::env::var("GALLERY_CRAWL_BASE_URL") {
            config.base_url = base;
        }
        if let Ok(root) = std::env::var("GALLERY_CRAWL_OUTPUT_ROOT") {
            config.output_root = PathBuf::from(root);
        }
        if let Some(n) = env_parse("GALLERY_CRAWL_CONCURRENCY") {
            config.max_concurrent_downloads = n;
        }
        if let Some(ms) = env_parse("GALLERY_CRAWL_TIMEOUT_MS") {
            config.timeout_ms = ms;
        }

        config
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_output_root(mut self, root: impl AsRef<Path>) -> Self {
        self.output_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrent_downloads = n;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Check that the settings can drive a crawl.
    pub fn validate(&self) -> CrawlResult<()> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| CrawlError::Config(format!("invalid base URL {}: {e}", self.base_url)))?;
        if parsed.host_str().is_none() {
            return Err(CrawlError::Config(format!(
                "base URL {} has no host",
                self.base_url
            )));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(CrawlError::Config("concurrency must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(CrawlError::Config("page size must be at least 1".into()));
        }
        if self.max_pages == Some(0) {
            return Err(CrawlError::Config("max pages must be at least 1".into()));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Profile page URL, also used as the referer.
    pub fn profile_url(&self, handle: &str) -> String {
        format!("{}/{handle}", self.base())
    }

    /// Continuation endpoint URL for an already serialized variables object.
    pub fn continuation_url(&self, request_id: &str, variables: &str) -> String {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("query_hash", request_id)
            .append_pair("variables", variables)
            .finish();
        format!("{}/graphql/query/?{query}", self.base())
    }

    /// Output directory for one account.
    pub fn output_dir(&self, handle: &str) -> PathBuf {
        self.output_root.join(format!("instagram_{handle}"))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

//! gallery-crawl — crawl a profile gallery page by page and keep one copy of every image.

pub mod config;
pub mod crawler;
pub mod http_client;
pub mod page;
pub mod script_id;
pub mod signature;
pub mod sink;
pub mod types;

pub use config::CrawlConfig;
pub use crawler::{continuation_variables, Crawler};
pub use http_client::{BodyKind, HttpClient, HttpResponse};
pub use page::{decode_page, parse_continuation_page, parse_initial_page, PageSource};
pub use script_id::{extract_request_id, find_script_url, resolve_request_id};
pub use signature::{derive, SigningContext, SIGNATURE_HEADER};
pub use sink::{fingerprint, DownloadSink, SinkStats};
pub use types::*;

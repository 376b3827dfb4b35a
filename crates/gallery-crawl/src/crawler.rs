//! Crawl orchestrator: the pagination state machine.
//!
//! ```text
//! Start -> AwaitInitialPage -> DispatchBatch -> Terminal
//!                                   ^    |
//!                                   |    v
//!                              AwaitNextPage
//! ```
//!
//! Page requests are strictly sequential because each one needs the previous
//! cursor. Media downloads run concurrently in the [`DownloadSink`].

use serde::Serialize;
use tracing::Instrument;

use crate::config::CrawlConfig;
use crate::http_client::{BodyKind, HttpClient, HttpResponse};
use crate::page::{decode_page, PageSource};
use crate::script_id::resolve_request_id;
use crate::signature::{SigningContext, SIGNATURE_HEADER};
use crate::sink::DownloadSink;
use crate::types::{
    CrawlError, CrawlReport, CrawlResult, InitialPage, PagePayload, SessionState,
};

#[derive(Serialize)]
struct ContinuationVariables<'a> {
    id: &'a str,
    first: u32,
    after: &'a str,
}

/// Serialize the `variables` object of a continuation request.
///
/// Field order is `id`, `first`, `after`; the signature covers these exact bytes.
pub fn continuation_variables(user_id: &str, first: u32, after: &str) -> String {
    let vars = ContinuationVariables {
        id: user_id,
        first,
        after,
    };
    // Serializing a struct of strings and an integer cannot fail.
    serde_json::to_string(&vars).unwrap_or_default()
}

enum CrawlState {
    Start,
    AwaitInitialPage(HttpResponse),
    DispatchBatch(PagePayload),
    AwaitNextPage {
        url: String,
        signature: Option<String>,
    },
    Terminal,
}

/// Crawls the gallery of one account per call.
pub struct Crawler {
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> CrawlResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Download every image of `handle` and report what happened.
    ///
    /// Parser failures and a missing request id abort the crawl. Failed
    /// individual requests are logged and counted.
    pub async fn crawl(&self, handle: &str) -> CrawlResult<CrawlReport> {
        let mut run = CrawlRun::new(&self.config, handle)?;
        let span = tracing::info_span!(
            "crawl",
            handle = %handle,
            session = %run.session.session_id
        );

        let driven = run.drive().instrument(span.clone()).await;
        match driven {
            Ok(()) => run.finish().instrument(span).await,
            Err(e) => {
                tracing::error!(parent: &span, "Crawl aborted: {e}");
                run.abort();
                Err(e)
            }
        }
    }
}

struct CrawlRun<'a> {
    config: &'a CrawlConfig,
    session: SessionState,
    client: HttpClient,
    profile_url: String,
    signing: SigningContext,
    sink: Option<DownloadSink>,
    report: CrawlReport,
}

impl<'a> CrawlRun<'a> {
    fn new(config: &'a CrawlConfig, handle: &str) -> CrawlResult<Self> {
        let profile_url = config.profile_url(handle);
        let client = HttpClient::new(&profile_url, config.timeout_ms)?;
        Ok(Self {
            config,
            session: SessionState::new(handle),
            client,
            profile_url,
            signing: SigningContext::default(),
            sink: None,
            report: CrawlReport {
                handle: handle.to_string(),
                ..Default::default()
            },
        })
    }

    async fn drive(&mut self) -> CrawlResult<()> {
        let mut state = CrawlState::Start;
        loop {
            state = match state {
                CrawlState::Start => self.start().await,
                CrawlState::AwaitInitialPage(resp) => self.initial_page(resp).await?,
                CrawlState::DispatchBatch(page) => self.dispatch(page).await?,
                CrawlState::AwaitNextPage { url, signature } => {
                    self.next_page(&url, signature).await?
                }
                CrawlState::Terminal => return Ok(()),
            };
        }
    }

    async fn start(&mut self) -> CrawlState {
        tracing::info!("looking for: {}", self.session.handle);
        self.report.pages_fetched += 1;
        match self.client.get(&self.profile_url, &[]).await {
            Ok(resp) => CrawlState::AwaitInitialPage(resp),
            Err(e) => {
                self.transport_error(&e);
                CrawlState::Terminal
            }
        }
    }

    async fn initial_page(&mut self, resp: HttpResponse) -> CrawlResult<CrawlState> {
        let html = resp.text();

        // The request id is only needed for the first continuation, so the
        // bundle fetch runs alongside the page decode.
        let (payload, request_id) = tokio::join!(
            async { decode_page(PageSource::Profile, &resp.body) },
            resolve_request_id(&self.client, &html, &self.profile_url)
        );
        let payload = payload?;
        self.session.request_id = Some(request_id?);

        Ok(CrawlState::DispatchBatch(payload))
    }

    /// Record what the profile page tells us about the account.
    async fn adopt_account(&mut self, initial: &InitialPage) -> CrawlResult<()> {
        tracing::info!(
            "Resolved user id {} ({} images on first page)",
            initial.user_id,
            initial.page.entries.len()
        );
        self.session.user_id = Some(initial.user_id.clone());
        self.session.seed = initial.seed.clone();
        self.signing = SigningContext::new(&self.session.seed);
        self.report.user_id = Some(initial.user_id.clone());

        let sink = DownloadSink::create(
            self.client.clone(),
            self.config.output_dir(&self.session.handle),
            self.config.max_concurrent_downloads,
        )
        .await?;
        tracing::info!("saving output to {}", sink.output_dir().display());
        self.sink = Some(sink);
        Ok(())
    }

    async fn dispatch(&mut self, payload: PagePayload) -> CrawlResult<CrawlState> {
        if let PagePayload::Initial(initial) = &payload {
            self.adopt_account(initial).await?;
        }
        let page = payload.into_page();
        self.report.videos_skipped += page.videos_skipped;

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| CrawlError::Io(std::io::Error::other("download sink not ready")))?;
        for entry in page.entries.iter().filter(|e| !e.is_video) {
            sink.submit(&entry.url).await?;
        }
        // A failed write must stop pagination before the next page is requested.
        sink.reap()?;

        let Some(cursor) = page.next_cursor() else {
            tracing::info!("No more pages");
            return Ok(CrawlState::Terminal);
        };

        if let Some(max) = self.config.max_pages {
            if self.report.pages_fetched >= max {
                tracing::info!("Page limit {max} reached");
                return Ok(CrawlState::Terminal);
            }
        }

        let (url, signature) = self.continuation_request(cursor)?;
        tracing::info!("Next page found {url}");
        Ok(CrawlState::AwaitNextPage { url, signature })
    }

    fn continuation_request(&mut self, cursor: &str) -> CrawlResult<(String, Option<String>)> {
        let user_id = self.session.user_id.as_deref().ok_or_else(|| {
            CrawlError::MalformedInitialPage("user id was not resolved".into())
        })?;
        let request_id = self.session.request_id.as_deref().ok_or_else(|| {
            CrawlError::RequestIdNotFound("request id was not resolved".into())
        })?;

        let variables = continuation_variables(user_id, self.config.page_size, cursor);
        self.signing.update(&self.session.seed, &variables);
        let url = self
            .config
            .continuation_url(request_id, self.signing.variables());
        Ok((url, self.signing.sign()))
    }

    async fn next_page(
        &mut self,
        url: &str,
        signature: Option<String>,
    ) -> CrawlResult<CrawlState> {
        let headers: Vec<(&str, String)> = signature
            .map(|sig| (SIGNATURE_HEADER, sig))
            .into_iter()
            .collect();

        self.report.pages_fetched += 1;
        self.report.continuation_requests += 1;
        let resp = match self.client.get(url, &headers).await {
            Ok(resp) => resp,
            Err(e) => {
                self.transport_error(&e);
                return Ok(CrawlState::Terminal);
            }
        };

        if resp.kind() != BodyKind::Json {
            tracing::warn!(
                "Ignoring continuation response with content type {}",
                resp.content_type.as_deref().unwrap_or("<none>")
            );
            self.report.ignored_responses += 1;
            return Ok(CrawlState::Terminal);
        }

        let payload = decode_page(PageSource::Continuation, &resp.body)?;
        tracing::debug!(
            "Continuation page with {} images",
            payload.page().entries.len()
        );
        Ok(CrawlState::DispatchBatch(payload))
    }

    fn transport_error(&mut self, e: &CrawlError) {
        self.report.transport_errors += 1;
        match e {
            CrawlError::Transport { url, message, body } => {
                tracing::warn!("error: {message} {url} {body}")
            }
            other => tracing::warn!("error: {other}"),
        }
    }

    fn abort(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.abort();
        }
    }

    async fn finish(mut self) -> CrawlResult<CrawlReport> {
        if let Some(sink) = self.sink.take() {
            let stats = sink.finish().await?;
            self.report.downloads_attempted = stats.attempted;
            self.report.files_written = stats.written;
            self.report.duplicates = stats.duplicates;
            self.report.ignored_responses += stats.ignored;
            self.report.transport_errors += stats.transport_errors;
        }
        tracing::info!(
            "Crawl finished: {} pages, {} files written",
            self.report.pages_fetched,
            self.report.files_written
        );
        Ok(self.report)
    }
}

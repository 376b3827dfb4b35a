//! Bounded concurrent media downloads with content-addressed storage.
//!
//! Each image is written to `<md5 hex>.jpg`, so identical bytes always land in
//! the same file no matter how many URLs serve them.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::http_client::{BodyKind, HttpClient, HttpResponse};
use crate::types::{CrawlError, CrawlResult};

/// Extension given to every stored image.
pub const IMAGE_EXTENSION: &str = "jpg";

/// Lowercase hex MD5 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Write `bytes` under their fingerprint and return the fingerprint and path.
///
/// Writing the same bytes twice leaves one file with identical content. The
/// data is staged in a temporary file that is either renamed into place or
/// removed, even if the calling task is cancelled.
pub async fn store(dir: &Path, bytes: Vec<u8>) -> CrawlResult<(String, PathBuf)> {
    let hash = fingerprint(&bytes);
    let path = dir.join(format!("{hash}.{IMAGE_EXTENSION}"));

    let staging = dir.to_path_buf();
    let target = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut partial = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(&staging)?;
        partial.write_all(&bytes)?;
        partial.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| CrawlError::Io(std::io::Error::other(format!("write task failed: {e}"))))??;

    Ok((hash, path))
}

/// Counters accumulated by the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub attempted: usize,
    pub written: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub transport_errors: usize,
}

enum Outcome {
    Written,
    Duplicate,
    Ignored,
    TransportError,
}

/// Schedules media fetches and writes each unique image once.
///
/// Finished downloads are collected as new ones are submitted, so a write
/// failure surfaces on the next [`submit`](Self::submit) or
/// [`reap`](Self::reap) instead of at the end of the crawl.
pub struct DownloadSink {
    client: HttpClient,
    output_dir: PathBuf,
    permits: Arc<Semaphore>,
    ledger: Arc<Mutex<HashSet<String>>>,
    tasks: JoinSet<CrawlResult<Outcome>>,
    stats: SinkStats,
}

impl DownloadSink {
    /// Create the sink, making sure `output_dir` exists.
    pub async fn create(
        client: HttpClient,
        output_dir: PathBuf,
        max_concurrent: usize,
    ) -> CrawlResult<Self> {
        tokio::fs::create_dir_all(&output_dir).await?;
        Ok(Self {
            client,
            output_dir,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            ledger: Arc::new(Mutex::new(HashSet::new())),
            tasks: JoinSet::new(),
            stats: SinkStats::default(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Schedule a download of `url`.
    ///
    /// Waits only for a concurrency permit, never for the download itself.
    /// Fails if an earlier download hit a write error.
    pub async fn submit(&mut self, url: &str) -> CrawlResult<()> {
        self.reap()?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CrawlError::Io(std::io::Error::other(e.to_string())))?;

        self.stats.attempted += 1;
        let client = self.client.clone();
        let dir = self.output_dir.clone();
        let ledger = self.ledger.clone();
        let url = url.to_string();

        self.tasks.spawn(async move {
            let _permit = permit;
            download(&client, &dir, &ledger, &url).await
        });
        Ok(())
    }

    /// Collect every download that has already finished.
    ///
    /// The first write failure aborts the remaining downloads and is returned.
    pub fn reap(&mut self) -> CrawlResult<()> {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record(joined)?;
        }
        Ok(())
    }

    /// Cancel everything still in flight.
    pub fn abort(&mut self) {
        self.tasks.abort_all();
    }

    /// Wait for all scheduled downloads and return the totals.
    ///
    /// The first write failure aborts the remaining downloads.
    pub async fn finish(mut self) -> CrawlResult<SinkStats> {
        while let Some(joined) = self.tasks.join_next().await {
            self.record(joined)?;
        }
        Ok(self.stats)
    }

    fn record(&mut self, joined: Result<CrawlResult<Outcome>, JoinError>) -> CrawlResult<()> {
        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => Err(CrawlError::Io(std::io::Error::other(format!(
                "download task failed: {e}"
            )))),
        };
        match outcome {
            Ok(Outcome::Written) => self.stats.written += 1,
            Ok(Outcome::Duplicate) => self.stats.duplicates += 1,
            Ok(Outcome::Ignored) => self.stats.ignored += 1,
            Ok(Outcome::TransportError) => self.stats.transport_errors += 1,
            Err(e) => {
                tracing::error!("Aborting downloads: {e}");
                self.abort();
                return Err(e);
            }
        }
        Ok(())
    }
}

async fn download(
    client: &HttpClient,
    dir: &Path,
    ledger: &Mutex<HashSet<String>>,
    url: &str,
) -> CrawlResult<Outcome> {
    let resp = match client.get(url, &[]).await {
        Ok(resp) => resp,
        Err(CrawlError::Transport { url, message, body }) => {
            tracing::warn!("error: {message} {url} {body}");
            return Ok(Outcome::TransportError);
        }
        Err(e) => return Err(e),
    };

    if resp.kind() != BodyKind::Image {
        tracing::debug!(
            "Ignoring {} ({}): content type {}",
            resp.url,
            resp.status,
            resp.content_type.as_deref().unwrap_or("<none>")
        );
        return Ok(Outcome::Ignored);
    }

    let HttpResponse {
        url, status, body, ..
    } = resp;
    let (hash, path) = store(dir, body).await?;
    let first = ledger
        .lock()
        .map(|mut l| l.insert(hash.clone()))
        .unwrap_or(true);

    if first {
        tracing::debug!("Saved {url} ({status}) -> {}", path.display());
        Ok(Outcome::Written)
    } else {
        tracing::debug!("Duplicate content {hash} from {url}");
        Ok(Outcome::Duplicate)
    }
}

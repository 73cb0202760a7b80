//! Artifact acquisition: cache reuse, checksum-verified fetch, atomic persist.
//!
//! Two independent retry loops apply to each artifact:
//!
//! - transport: a broken connection or a 5xx answer replays the whole request
//! - content: a body that fails checksum verification is fetched again
//!
//! Both are bounded. A file only appears at its final path once its content
//! has been verified.

use rayon::ThreadPool;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactDescriptor;
use crate::error::{FetchError, TransportError};

pub const CHECKSUM_ATTEMPTS: u32 = 3;
pub const TRANSPORT_ATTEMPTS: u32 = 3;

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deprecated-usage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let connection = |e: reqwest::Error| TransportError::Connection {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().map_err(connection)?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().map_err(connection)?.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Use an existing local file, download otherwise.
    #[default]
    ReuseExisting,
    /// Always download, replacing local files.
    Refresh,
    /// Never download; a missing file is a failure.
    Offline,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub checksum_attempts: u32,
    pub transport_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            checksum_attempts: CHECKSUM_ATTEMPTS,
            transport_attempts: TRANSPORT_ATTEMPTS,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    pub from_cache: Arc<AtomicU64>,
    pub downloaded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub bytes: Arc<AtomicU64>,
}

impl DownloadStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.from_cache.load(Ordering::Relaxed),
            self.downloaded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

pub struct Downloader<F: Fetcher> {
    fetcher: F,
    cache: CachePolicy,
    retry: RetryPolicy,
    stats: DownloadStats,
}

impl<F: Fetcher> Downloader<F> {
    pub fn new(fetcher: F, cache: CachePolicy) -> Self {
        Self {
            fetcher,
            cache,
            retry: RetryPolicy::default(),
            stats: DownloadStats::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stats(&self) -> DownloadStats {
        self.stats.clone()
    }

    /// Makes the artifact available at `artifact.file`.
    pub fn acquire(&self, artifact: &ArtifactDescriptor) -> Result<DownloadSource, FetchError> {
        let result = self.acquire_inner(artifact);
        let counter = match &result {
            Ok(DownloadSource::Cache) => &self.stats.from_cache,
            Ok(DownloadSource::Network) => &self.stats.downloaded,
            Err(_) => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn acquire_inner(&self, artifact: &ArtifactDescriptor) -> Result<DownloadSource, FetchError> {
        let exists = artifact.file.is_file();
        match self.cache {
            CachePolicy::ReuseExisting | CachePolicy::Offline if exists => {
                return Ok(DownloadSource::Cache);
            }
            CachePolicy::Offline => {
                return Err(FetchError::NotAvailableOffline {
                    path: artifact.file.clone(),
                });
            }
            _ => {}
        }

        let data = self.fetch_verified(artifact)?;
        persist(&artifact.file, &data)?;
        self.stats
            .bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        info!(url = %artifact.url, kib = data.len() / 1024, "downloaded");
        Ok(DownloadSource::Network)
    }

    fn fetch_verified(&self, artifact: &ArtifactDescriptor) -> Result<Vec<u8>, FetchError> {
        let attempts = self.retry.checksum_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let data = self.fetch_with_replay(&artifact.url)?;
            let Some(expected) = &artifact.checksum else {
                return Ok(data);
            };
            match expected.verify(&data) {
                Ok(()) => return Ok(data),
                Err(actual) if attempt < attempts => {
                    warn!(url = %artifact.url, attempt, attempts, %actual, "checksum mismatch, retrying download");
                }
                Err(actual) => {
                    return Err(FetchError::ChecksumMismatch {
                        url: artifact.url.clone(),
                        attempts,
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }
    }

    /// Replays the whole request on transient failures.
    fn fetch_with_replay(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let attempts = self.retry.transport_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetcher.fetch(url) {
                Ok(data) => return Ok(data),
                Err(err) if err.is_transient() && attempt < attempts => {
                    debug!(url, attempt, attempts, error = %err, "transient failure, replaying request");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                }
                Err(source) => {
                    return Err(FetchError::Transport {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

/// Writes to `<file>.part` and renames, so the final path never holds a
/// partial body. The `.part` file is removed when either step fails.
pub fn persist(path: &Path, data: &[u8]) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = part_path(path);
    let written = write_part(&tmp, data).and_then(|()| fs::rename(&tmp, path));
    if let Err(source) = written {
        if let Err(cleanup) = fs::remove_file(&tmp)
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!(file = %tmp.display(), error = %cleanup, "failed to remove partial download");
        }
        return Err(io_err(source));
    }
    Ok(())
}

fn write_part(tmp: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(data)?;
    file.sync_all()
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Text of a panic payload raised with `panic!("...")`.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Outcome of one artifact, sent as soon as it is known.
pub type Acquired = (ArtifactDescriptor, Result<DownloadSource, FetchError>);

/// Spawns one acquisition task per artifact on a dedicated pool of
/// `max_concurrent` threads. The sender is dropped once every task has
/// reported, which closes the channel for the receiver.
pub fn spawn_downloads<F>(
    downloader: Arc<Downloader<F>>,
    artifacts: Vec<ArtifactDescriptor>,
    max_concurrent: usize,
    tx: Sender<Acquired>,
) -> Result<ThreadPool, rayon::ThreadPoolBuildError>
where
    F: Fetcher + 'static,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_concurrent.max(1))
        .thread_name(|i| format!("download-{i}"))
        .panic_handler(|payload| warn!(panic = %panic_message(payload.as_ref()), "download task panicked"))
        .build()?;
    for artifact in artifacts {
        let downloader = Arc::clone(&downloader);
        let tx = tx.clone();
        pool.spawn(move || {
            let result = downloader.acquire(&artifact);
            if let Err(err) = &result {
                warn!(artifact = %artifact.name, error = %err, "acquisition failed");
            }
            let _ = tx.send((artifact, result));
        });
    }
    Ok(pool)
}

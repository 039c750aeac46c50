//! Run driver.
//!
//! Targets are resolved one after another on the calling task. Every asset is
//! checked against the cache and the filesystem there, and whatever still
//! needs downloading is queued for a fixed pool of workers. Workers own the
//! network and file I/O, record completions in the cache and report into the
//! shared [`StatsCollector`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::api::{ErrApiClient, MetadataApi};
use crate::asset::{Asset, AssetOrigin, ResolutionFailure, ResolvedItem};
use crate::cache::{CacheLookup, CacheRecord, CacheStore};
use crate::config::EngineConfig;
use crate::error::{CacheError, EngineError, ResolutionError, Result};
use crate::fetcher::{Fetch, FetchOutcome, HttpFetcher};
use crate::http::build_client;
use crate::resolver::AssetResolver;
use crate::stats::{AssetOutcome, AssetReport, FailureCategory, RunStatistics, SkipReason, StatsCollector};
use crate::target::Target;

/// Queued downloads per worker before dispatch waits.
const QUEUE_DEPTH_PER_WORKER: usize = 2;

/// An asset waiting for a worker.
struct Job {
    asset: Asset,
    destination: PathBuf,
    /// Bytes already at the destination when the job was queued.
    existing_size: u64,
}

pub struct Orchestrator {
    config: EngineConfig,
    resolver: AssetResolver,
    fetcher: Arc<dyn Fetch>,
    cache: Arc<CacheStore>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn MetadataApi>,
        fetcher: Arc<dyn Fetch>,
        cache: Arc<CacheStore>,
    ) -> Self {
        let resolver = AssetResolver::new(
            api,
            config.directories.clone(),
            config.resolve_retry.policy(),
        );
        Self {
            config,
            resolver,
            fetcher,
            cache,
        }
    }

    /// Process every target and return the run's statistics.
    ///
    /// Per-asset failures are tallied, never returned. Only an unwritable
    /// cache or a crashed worker aborts the run with an error. Cancelling
    /// `cancel` stops dispatch and in-flight downloads; the statistics
    /// gathered so far are still returned.
    pub async fn run(&self, targets: &[Target], cancel: CancellationToken) -> Result<RunStatistics> {
        let pool_size = self.config.threading.pool_size();
        let stats = Arc::new(StatsCollector::new());
        let (tx, rx) = mpsc::channel::<Job>(pool_size * QUEUE_DEPTH_PER_WORKER);
        let rx = Arc::new(Mutex::new(rx));

        info!(
            targets = targets.len(),
            workers = pool_size,
            cached = self.cache.len(),
            "Starting run"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            workers.spawn(worker_loop(
                worker_id,
                rx.clone(),
                self.fetcher.clone(),
                self.cache.clone(),
                stats.clone(),
                self.config.download.skip_existing,
                cancel.clone(),
            ));
        }
        drop(rx);

        let mut fatal: Option<EngineError> = None;
        if let Err(e) = self.dispatch(targets, &tx, &stats, &cancel).await {
            error!(error = %e, "Cache unwritable, aborting run");
            cancel.cancel();
            fatal = Some(e.into());
        }
        // Closing the queue lets idle workers exit.
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    fatal.get_or_insert(e.into());
                }
                Err(e) => {
                    error!(error = %e, "Download worker panicked");
                    cancel.cancel();
                    fatal.get_or_insert(EngineError::Worker {
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let statistics = stats.finish();
        info!(
            attempted = statistics.attempted,
            succeeded = statistics.succeeded,
            skipped_cached = statistics.skipped_cached,
            skipped_protected = statistics.skipped_protected,
            failed = statistics.failed,
            bytes = statistics.bytes_downloaded,
            cancelled = cancel.is_cancelled(),
            "Run finished"
        );
        Ok(statistics)
    }

    async fn dispatch(
        &self,
        targets: &[Target],
        tx: &mpsc::Sender<Job>,
        stats: &StatsCollector,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let mut paths = PathAllocator::default();
        let mut seen = HashSet::new();

        'targets: for target in targets {
            if cancel.is_cancelled() {
                break;
            }

            let resolution = match self.resolver.resolve(target, cancel).await {
                Ok(resolution) => resolution,
                Err(_) if cancel.is_cancelled() => break,
                Err(error) => {
                    warn!(url = %target.url, error = %error, "Target failed to resolve");
                    let failure = ResolutionFailure {
                        content_id: target.content_id().ok().map(|id| id.to_string()),
                        origin: AssetOrigin {
                            target_url: target.url.clone(),
                            category: target.category,
                            series: None,
                        },
                        error,
                    };
                    stats.record(failure_report(&failure));
                    continue;
                }
            };

            for item in resolution.items {
                if cancel.is_cancelled() {
                    break 'targets;
                }
                let asset = match item {
                    ResolvedItem::Asset(asset) => asset,
                    ResolvedItem::Failed(failure) => {
                        stats.record(failure_report(&failure));
                        continue;
                    }
                };
                if !seen.insert(asset.id.clone()) {
                    debug!(asset = %asset, "Already handled in this run");
                    continue;
                }

                let Some(job) = self.prepare(asset, &mut paths, stats).await? else {
                    continue;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break 'targets,
                    sent = tx.send(job) => {
                        if sent.is_err() {
                            // Every worker has exited; a fatal error is on its way.
                            break 'targets;
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            warn!("Run cancelled, remaining assets were not dispatched");
        }
        Ok(())
    }

    /// Settle everything that does not need the fetcher. Returns the job to
    /// queue, or `None` if the asset reached a terminal state here.
    async fn prepare(
        &self,
        asset: Asset,
        paths: &mut PathAllocator,
        stats: &StatsCollector,
    ) -> Result<Option<Job>, CacheError> {
        match self.cache.lookup(&asset.id).await {
            CacheLookup::Hit(record) => {
                debug!(asset = %asset, path = %record.path.display(), "Cached, skipping");
                stats.record(report(&asset, AssetOutcome::Skipped {
                    reason: SkipReason::Cached,
                }));
                return Ok(None);
            }
            CacheLookup::Stale(record) => {
                info!(
                    asset = %asset,
                    path = %record.path.display(),
                    "Cached file missing or incomplete, downloading again"
                );
            }
            CacheLookup::Miss => {}
        }

        if asset.protected {
            info!(asset = %asset, "DRM protected, skipping");
            stats.record(report(&asset, AssetOutcome::Skipped {
                reason: SkipReason::DrmProtected,
            }));
            return Ok(None);
        }

        let destination = paths.claim(&asset, &self.cache);
        let existing_size = file_size(&destination).await;

        // Whatever is already on disk is resumed by the fetcher, never thrown away.
        if existing_size > 0
            && self.config.download.skip_existing
            && asset.expected_size.is_some_and(|expected| existing_size >= expected)
        {
            info!(asset = %asset, path = %destination.display(), "Already on disk, skipping");
            self.cache
                .record(&asset.id, CacheRecord::new(&destination, existing_size))
                .await?;
            stats.record(report(&asset, AssetOutcome::Skipped {
                reason: SkipReason::AlreadyExists,
            }));
            return Ok(None);
        }

        Ok(Some(Job {
            asset,
            destination,
            existing_size,
        }))
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    fetcher: Arc<dyn Fetch>,
    cache: Arc<CacheStore>,
    stats: Arc<StatsCollector>,
    skip_existing: bool,
    cancel: CancellationToken,
) -> Result<(), CacheError> {
    debug!(worker_id, "Download worker started");

    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let outcome = match fetcher.fetch(&job.asset, &job.destination, &cancel).await {
            FetchOutcome::Completed(done) => {
                let record = CacheRecord::new(&job.destination, done.file_size);
                if let Err(e) = cache.record(&job.asset.id, record).await {
                    error!(worker_id, error = %e, "Failed to record completed download");
                    cancel.cancel();
                    return Err(e);
                }
                if skip_existing && done.bytes_written == 0 && job.existing_size > 0 {
                    // The remote confirmed the file on disk was already whole.
                    AssetOutcome::Skipped {
                        reason: SkipReason::AlreadyExists,
                    }
                } else {
                    AssetOutcome::Recorded {
                        bytes_written: done.bytes_written,
                    }
                }
            }
            FetchOutcome::Skipped(reason) => AssetOutcome::Skipped { reason },
            FetchOutcome::Failed(err) => AssetOutcome::Failed {
                category: FailureCategory::Fetch(err.kind()),
            },
        };
        stats.record(report(&job.asset, outcome));
    }

    debug!(worker_id, "Download worker finished");
    Ok(())
}

fn report(asset: &Asset, outcome: AssetOutcome) -> AssetReport {
    AssetReport {
        content_id: Some(asset.id.clone()),
        label: asset.label(),
        origin: asset.origin.clone(),
        outcome,
    }
}

fn failure_report(failure: &ResolutionFailure) -> AssetReport {
    AssetReport {
        content_id: failure.content_id.clone(),
        label: failure.label(),
        origin: failure.origin.clone(),
        outcome: AssetOutcome::Failed {
            category: FailureCategory::Resolution(resolution_reason(&failure.error)),
        },
    }
}

fn resolution_reason(error: &ResolutionError) -> String {
    match error {
        ResolutionError::NotFound { .. } => "not found".to_string(),
        other => other.to_string(),
    }
}

async fn file_size(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

/// Hands out destination paths so that two different assets never share one.
///
/// The first asset to claim a path keeps it; later ones get `_2`, `_3`, ...
/// appended to the file stem. Paths recorded in the cache for other ids count
/// as claimed, which keeps the assignment stable across runs.
#[derive(Debug, Default)]
struct PathAllocator {
    claimed: HashMap<PathBuf, String>,
}

impl PathAllocator {
    fn claim(&mut self, asset: &Asset, cache: &CacheStore) -> PathBuf {
        let base = &asset.destination;
        let mut candidate = base.clone();
        let mut n = 1;
        loop {
            let owner = self
                .claimed
                .get(&candidate)
                .cloned()
                .or_else(|| cache.owner_of(&candidate));
            match owner {
                Some(id) if id != asset.id => {
                    n += 1;
                    candidate = with_suffix(base, n);
                }
                _ => break,
            }
        }
        if candidate != *base {
            info!(
                asset = %asset,
                path = %candidate.display(),
                "Destination already taken, using a suffixed name"
            );
        }
        self.claimed.insert(candidate.clone(), asset.id.clone());
        candidate
    }
}

fn with_suffix(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// Run `targets` with the default HTTP stack.
///
/// Validates `config`, builds one HTTP client for metadata and downloads,
/// loads the cache from `config.cache.file` and drives an [`Orchestrator`].
pub async fn run(targets: &[Target], config: &EngineConfig) -> Result<RunStatistics> {
    run_until_cancelled(targets, config, CancellationToken::new()).await
}

/// [`run`], stopping early when `cancel` fires.
pub async fn run_until_cancelled(
    targets: &[Target],
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<RunStatistics> {
    config.validate()?;

    let base_url = Url::parse(&config.api.base_url)
        .map_err(|e| EngineError::configuration(format!("api.base_url: {e}")))?;
    let client = build_client(&config.http)?;
    let api = Arc::new(ErrApiClient::new(
        client.clone(),
        base_url,
        config.http.timeout(),
    ));
    let fetcher = Arc::new(HttpFetcher::new(client, config.retry.policy()));
    let cache = Arc::new(CacheStore::load(&config.cache.file).await);

    Orchestrator::new(config.clone(), api, fetcher, cache)
        .run(targets, cancel)
        .await
}

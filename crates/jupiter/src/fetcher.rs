// Media fetcher: one asset, one file, resumable with byte ranges and retried
// with exponential backoff.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use indicatif::ProgressStyle;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::asset::Asset;
use crate::error::FetchError;
use crate::retry::{Cancelled, RetryAction, RetryPolicy, retry_with_backoff};
use crate::stats::SkipReason;

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        FetchError::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedFetch {
    /// Bytes received over the network by this fetch.
    pub bytes_written: u64,
    /// Final size of the file on disk.
    pub file_size: u64,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Completed(CompletedFetch),
    Skipped(SkipReason),
    Failed(FetchError),
}

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Download `asset` into `destination`.
    ///
    /// Never returns an error: every problem is folded into the outcome so a
    /// single asset cannot abort a run.
    async fn fetch(
        &self,
        asset: &Asset,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> FetchOutcome;
}

/// `Content-Range` of a partial or unsatisfiable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: Option<u64>,
    total: Option<u64>,
}

/// Parse `bytes 100-199/200`, `bytes 100-199/*` or `bytes */200`.
fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    let start = match range.trim() {
        "*" => None,
        r => Some(r.split_once('-')?.0.parse().ok()?),
    };
    Some(ContentRange { start, total })
}

fn content_range(headers: &HeaderMap) -> Option<ContentRange> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

/// What to do with a response to a (possibly ranged) request.
enum RangeCheck {
    /// Write the body starting at this offset (0 truncates).
    Write { offset: u64, total: Option<u64> },
    /// The partial file already holds the whole resource.
    AlreadyComplete { size: u64 },
    /// The remote cannot continue our partial file; start over.
    Restart,
}

fn check_range(
    requested_offset: u64,
    response: &Response,
    expected: Option<u64>,
) -> RangeCheck {
    let status = response.status();
    if requested_offset == 0 {
        return RangeCheck::Write {
            offset: 0,
            total: expected.or_else(|| {
                if status == StatusCode::PARTIAL_CONTENT {
                    content_range(response.headers()).and_then(|r| r.total)
                } else {
                    response.content_length()
                }
            }),
        };
    }

    match status {
        StatusCode::PARTIAL_CONTENT => match content_range(response.headers()) {
            Some(ContentRange {
                start: Some(start),
                total,
            }) if start == requested_offset
                && (expected.is_none() || total.is_none() || total == expected) =>
            {
                RangeCheck::Write {
                    offset: requested_offset,
                    total: expected.or(total),
                }
            }
            _ => RangeCheck::Restart,
        },
        StatusCode::RANGE_NOT_SATISFIABLE => match content_range(response.headers()) {
            Some(ContentRange {
                total: Some(total), ..
            }) if total == requested_offset && expected.is_none_or(|e| e == total) => {
                RangeCheck::AlreadyComplete { size: total }
            }
            _ => RangeCheck::Restart,
        },
        // Range ignored: a full body follows and replaces the partial file.
        s if s.is_success() => RangeCheck::Write {
            offset: 0,
            total: expected.or_else(|| response.content_length()),
        },
        // Errors are classified by the caller.
        _ => RangeCheck::Write {
            offset: requested_offset,
            total: expected,
        },
    }
}

async fn existing_size(path: &Path) -> Result<u64, FetchError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(FetchError::io(
            "destination is not a file",
            path,
            std::io::Error::other("not a regular file"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(FetchError::io("inspecting", path, e)),
    }
}

async fn discard_partial(path: &Path) -> Result<(), FetchError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FetchError::io("removing partial file", path, e)),
    }
}

async fn open_for_write(path: &Path, offset: u64) -> Result<File, FetchError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io("creating directory", parent, e))?;
    }
    let mut options = OpenOptions::new();
    if offset == 0 {
        options.create(true).write(true).truncate(true);
    } else {
        options.append(true);
    }
    options
        .open(path)
        .await
        .map_err(|e| FetchError::io("opening", path, e))
}

fn classify<T>(err: FetchError) -> RetryAction<T, FetchError> {
    if err.is_retryable() {
        RetryAction::Retry(err)
    } else {
        RetryAction::Fail(err)
    }
}

/// [`Fetch`] over HTTP with resume support.
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn send(&self, url: &str, offset: u64) -> Result<Response, FetchError> {
        let mut request = self.client.get(url).header(ACCEPT_ENCODING, "identity");
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        Ok(request.send().await?)
    }

    /// One download attempt. Bytes already on disk are kept for the next one.
    async fn attempt(
        &self,
        asset: &Asset,
        destination: &Path,
        cancel: &CancellationToken,
        span: &Span,
    ) -> RetryAction<CompletedFetch, FetchError> {
        let expected = asset.expected_size;
        let mut existing = match existing_size(destination).await {
            Ok(size) => size,
            Err(e) => return RetryAction::Fail(e),
        };

        if let Some(expected) = expected {
            if existing > 0 && existing == expected {
                debug!(size = existing, "Partial file already complete");
                return RetryAction::Success(CompletedFetch {
                    bytes_written: 0,
                    file_size: existing,
                });
            }
            if existing > expected {
                warn!(existing, expected, "Partial file larger than expected, discarding");
                if let Err(e) = discard_partial(destination).await {
                    return RetryAction::Fail(e);
                }
                existing = 0;
            }
        }

        let (response, offset, total) = loop {
            let response = match self.send(&asset.source_url, existing).await {
                Ok(response) => response,
                Err(e) => return classify(e),
            };
            match check_range(existing, &response, expected) {
                RangeCheck::Write { offset, total } => break (response, offset, total),
                RangeCheck::AlreadyComplete { size } => {
                    debug!(size, "Remote reports partial file is complete");
                    return RetryAction::Success(CompletedFetch {
                        bytes_written: 0,
                        file_size: size,
                    });
                }
                RangeCheck::Restart => {
                    warn!(
                        offset = existing,
                        status = %response.status(),
                        "Remote did not honor resume, restarting from scratch"
                    );
                    if let Err(e) = discard_partial(destination).await {
                        return RetryAction::Fail(e);
                    }
                    existing = 0;
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return classify(FetchError::http_status(status, asset.source_url.as_str()));
        }
        if offset > 0 {
            info!(offset, "Resuming download");
        } else if existing > 0 {
            debug!("Remote ignored range request, replacing partial file");
        }

        span.pb_set_length(total.unwrap_or(0));
        span.pb_set_position(offset);

        let mut stream = response.bytes_stream();
        let mut file: Option<File> = None;
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };
            let chunk = match next {
                None => {
                    if let Some(f) = file.as_mut() {
                        let _ = f.flush().await;
                    }
                    return RetryAction::Fail(FetchError::Cancelled);
                }
                Some(None) => break,
                Some(Some(Ok(chunk))) => chunk,
                Some(Some(Err(e))) => {
                    if let Some(f) = file.as_mut() {
                        let _ = f.flush().await;
                    }
                    let received = offset + written;
                    let err = if e.is_timeout() {
                        FetchError::Timeout {
                            reason: e.to_string(),
                        }
                    } else {
                        FetchError::Truncated {
                            expected: total.unwrap_or(0),
                            received,
                        }
                    };
                    return RetryAction::Retry(err);
                }
            };
            if chunk.is_empty() {
                continue;
            }

            if file.is_none() {
                file = match open_for_write(destination, offset).await {
                    Ok(f) => Some(f),
                    Err(e) => return RetryAction::Fail(e),
                };
            }
            if let Some(f) = file.as_mut()
                && let Err(e) = f.write_all(&chunk).await
            {
                return RetryAction::Fail(FetchError::io("writing", destination, e));
            }
            written += chunk.len() as u64;
            span.pb_set_position(offset + written);
        }

        if let Some(mut f) = file {
            if let Err(e) = f.flush().await {
                return RetryAction::Fail(FetchError::io("flushing", destination, e));
            }
        }

        let file_size = if written > 0 || offset > 0 {
            match existing_size(destination).await {
                Ok(size) => size,
                Err(e) => return RetryAction::Fail(e),
            }
        } else {
            0
        };

        if file_size == 0 {
            return RetryAction::Retry(FetchError::Truncated {
                expected: total.unwrap_or(0),
                received: 0,
            });
        }

        if let Some(expected) = total
            && file_size != expected
        {
            if file_size > expected {
                // Unusable for resume.
                if let Err(e) = discard_partial(destination).await {
                    return RetryAction::Fail(e);
                }
            }
            return RetryAction::Retry(FetchError::SizeMismatch {
                expected,
                actual: file_size,
            });
        }

        RetryAction::Success(CompletedFetch {
            bytes_written: written,
            file_size,
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        asset: &Asset,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        if asset.protected {
            debug!(asset = %asset, "DRM protected, not downloading");
            return FetchOutcome::Skipped(SkipReason::DrmProtected);
        }

        let span = info_span!("download", id = %asset.id);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{span_child_prefix}{spinner:.green} [{bar:30.green/white}] {bytes}/{total_bytes} {bytes_per_sec} {msg}",
        ) {
            span.pb_set_style(&style.progress_chars("=> "));
        }
        span.pb_set_message(&asset.file_name);

        let result = retry_with_backoff(&self.retry, cancel, |_| {
            self.attempt(asset, destination, cancel, &span)
        })
        .instrument(span.clone())
        .await;

        match result {
            Ok(completed) => {
                span.pb_set_finish_message(&format!("{} done", asset.file_name));
                info!(
                    asset = %asset,
                    bytes = completed.bytes_written,
                    size = completed.file_size,
                    "Download completed"
                );
                FetchOutcome::Completed(completed)
            }
            Err(err) => {
                span.pb_set_finish_message(&format!("{} failed: {err}", asset.file_name));
                warn!(asset = %asset, error = %err, "Download failed");
                FetchOutcome::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_content_range() {
        assert_eq!(
            parse_content_range("bytes 100-199/200"),
            Some(ContentRange {
                start: Some(100),
                total: Some(200)
            })
        );
        assert_eq!(
            parse_content_range("bytes 0-9/*"),
            Some(ContentRange {
                start: Some(0),
                total: None
            })
        );
    }

    #[test]
    fn parses_unsatisfied_range() {
        assert_eq!(
            parse_content_range("bytes */4096"),
            Some(ContentRange {
                start: None,
                total: Some(4096)
            })
        );
    }

    #[test]
    fn rejects_garbage_ranges() {
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes 0-1"), None);
        assert_eq!(parse_content_range("bytes x-1/2"), None);
    }
}

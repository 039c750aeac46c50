// Run statistics: lock-free counters plus an itemized outcome list.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::asset::AssetOrigin;
use crate::error::FetchErrorKind;

/// Why an asset was not downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Cached,
    AlreadyExists,
    DrmProtected,
}

/// Failure category for itemized reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureCategory {
    Resolution(String),
    Fetch(FetchErrorKind),
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution(reason) => write!(f, "resolution failed: {reason}"),
            Self::Fetch(kind) => write!(f, "download failed: {kind}"),
        }
    }
}

/// Terminal state of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AssetOutcome {
    Recorded { bytes_written: u64 },
    Skipped { reason: SkipReason },
    Failed { category: FailureCategory },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReport {
    pub content_id: Option<String>,
    pub label: String,
    pub origin: AssetOrigin,
    pub outcome: AssetOutcome,
}

/// Shared accumulator mutated by every worker during a run.
///
/// Counters are plain atomic increments, so final totals do not depend on
/// the order in which workers finish.
#[derive(Debug, Default)]
pub struct StatsCollector {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    skipped_cached: AtomicU64,
    skipped_protected: AtomicU64,
    failed: AtomicU64,
    bytes_downloaded: AtomicU64,
    reports: Mutex<Vec<AssetReport>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: AssetReport) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        match &report.outcome {
            AssetOutcome::Recorded { bytes_written } => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                self.bytes_downloaded
                    .fetch_add(*bytes_written, Ordering::Relaxed);
            }
            AssetOutcome::Skipped {
                reason: SkipReason::Cached | SkipReason::AlreadyExists,
            } => {
                self.skipped_cached.fetch_add(1, Ordering::Relaxed);
            }
            AssetOutcome::Skipped {
                reason: SkipReason::DrmProtected,
            } => {
                self.skipped_protected.fetch_add(1, Ordering::Relaxed);
            }
            AssetOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.reports.lock().push(report);
    }

    /// Snapshot the run.
    pub fn finish(&self) -> RunStatistics {
        let reports = self.reports.lock().clone();
        RunStatistics {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped_cached: self.skipped_cached.load(Ordering::Relaxed),
            skipped_protected: self.skipped_protected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            reports,
        }
    }
}

/// Aggregate result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped_cached: u64,
    pub skipped_protected: u64,
    pub failed: u64,
    pub bytes_downloaded: u64,
    /// Per-asset outcomes in completion order.
    pub reports: Vec<AssetReport>,
}

impl RunStatistics {
    /// Whether anything failed on its own. Downloads stopped by cancellation
    /// are itemized as failures but do not count here.
    pub fn has_failures(&self) -> bool {
        self.failures().any(|r| {
            !matches!(
                r.outcome,
                AssetOutcome::Failed {
                    category: FailureCategory::Fetch(FetchErrorKind::Cancelled)
                }
            )
        })
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_cached + self.skipped_protected
    }

    /// Counters only, for comparing runs regardless of completion order.
    pub fn counts(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.attempted,
            self.succeeded,
            self.skipped_cached,
            self.skipped_protected,
            self.failed,
        )
    }

    pub fn completed(&self) -> impl Iterator<Item = &AssetReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, AssetOutcome::Recorded { .. }))
    }

    pub fn protected(&self) -> impl Iterator<Item = &AssetReport> {
        self.reports.iter().filter(|r| {
            matches!(
                r.outcome,
                AssetOutcome::Skipped {
                    reason: SkipReason::DrmProtected
                }
            )
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssetReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, AssetOutcome::Failed { .. }))
    }
}

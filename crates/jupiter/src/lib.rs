//! Download orchestration engine for ERR Jupiter video-on-demand content
//!
//! This crate takes configured series and movie URLs, resolves them into
//! concrete media files through the ERR content-page API, downloads what is not
//! already on disk and keeps a persistent record of completed downloads.
//!
//! ## Features
//!
//! - Series expansion into every episode of every season
//! - Resumable downloads using HTTP byte ranges
//! - Retry with exponential backoff for transient failures
//! - Write-through download cache shared by concurrent workers
//! - Sequential or bounded-parallel scheduling
//! - Per-asset outcome reporting
//!
//! ## Component Overview
//!
//! - `api`: Content-page API client and response models
//! - `resolver`: Turns targets into downloadable assets
//! - `fetcher`: Resumable, retrying HTTP downloader
//! - `cache`: Persistent record of completed downloads
//! - `orchestrator`: Runs a batch of targets on a worker pool
//! - `stats`: Run statistics and per-asset reports

pub mod api;
pub mod asset;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filename;
pub mod http;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod stats;
pub mod target;

pub use api::{ContentPage, ErrApiClient, MetadataApi};
pub use asset::{Asset, AssetOrigin, Resolution, ResolutionFailure, ResolvedItem};
pub use cache::{CacheLookup, CacheRecord, CacheStore};
pub use config::EngineConfig;
pub use error::{CacheError, EngineError, FetchError, FetchErrorKind, ResolutionError, Result};
pub use fetcher::{CompletedFetch, Fetch, FetchOutcome, HttpFetcher};
pub use orchestrator::{Orchestrator, run, run_until_cancelled};
pub use resolver::AssetResolver;
pub use retry::RetryPolicy;
pub use stats::{AssetOutcome, AssetReport, FailureCategory, RunStatistics, SkipReason};
pub use target::{Category, Target, extract_content_id};

pub use tokio_util::sync::CancellationToken;

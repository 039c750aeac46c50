use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;
use crate::target::Category;

pub const DEFAULT_API_BASE_URL: &str =
    "https://services.err.ee/api/v2/vodContent/getContentPageData";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

pub const DEFAULT_CACHE_FILE: &str = "downloads_cache.json";

/// Upper bound on parallel downloads, regardless of configuration.
pub const MAX_POOL_SIZE: usize = 16;

/// Validated engine configuration.
///
/// Loading and parsing the raw configuration file is the caller's job; the
/// engine only consumes this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub directories: DirectoriesConfig,
    pub download: DownloadConfig,
    pub threading: ThreadingConfig,
    pub retry: RetryConfig,
    pub resolve_retry: ResolveRetryConfig,
    pub http: HttpConfig,
    pub api: ApiConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub tv_shows: PathBuf,
    pub movies: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            tv_shows: PathBuf::from("downloads/tv_shows"),
            movies: PathBuf::from("downloads/movies"),
        }
    }
}

impl DirectoriesConfig {
    pub fn root_for(&self, category: Category) -> &std::path::Path {
        match category {
            Category::Series => &self.tv_shows,
            Category::Movie => &self.movies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Treat a complete file already on disk as a cache hit. Partial files
    /// are resumed either way.
    pub skip_existing: bool,
    /// Expand series URLs into every episode of every season.
    pub download_all_episodes: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            skip_existing: true,
            download_all_episodes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    pub use_threading: bool,
    pub max_workers: usize,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            use_threading: false,
            max_workers: 4,
        }
    }
}

impl ThreadingConfig {
    /// Number of download workers for a run. Sequential mode is a pool of one.
    pub fn pool_size(&self) -> usize {
        if self.use_threading {
            self.max_workers.clamp(1, MAX_POOL_SIZE)
        } else {
            1
        }
    }
}

/// Fetch retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// Metadata lookups get a smaller budget than downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ResolveRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
        }
    }
}

impl ResolveRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let base_delay = Duration::from_millis(self.base_delay_ms);
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay,
            max_delay: base_delay * 4,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout for metadata lookups, in seconds.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Maximum silence between body chunks during a download, in seconds.
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Location of the completed-downloads record, relative to the working directory.
    pub file: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_CACHE_FILE),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(EngineError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.resolve_retry.max_attempts == 0 {
            return Err(EngineError::configuration(
                "resolve_retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(EngineError::configuration(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms",
            ));
        }
        if self.threading.use_threading && self.threading.max_workers == 0 {
            return Err(EngineError::configuration(
                "threading.max_workers must be at least 1",
            ));
        }
        if self.directories.tv_shows.as_os_str().is_empty()
            || self.directories.movies.as_os_str().is_empty()
        {
            return Err(EngineError::configuration(
                "directories.tv_shows and directories.movies must be set",
            ));
        }
        if self.cache.file.as_os_str().is_empty() {
            return Err(EngineError::configuration("cache.file must be set"));
        }
        url::Url::parse(&self.api.base_url).map_err(|e| {
            EngineError::configuration(format!("invalid api.base_url `{}`: {e}", self.api.base_url))
        })?;
        Ok(())
    }
}

use std::path::PathBuf;

use reqwest::StatusCode;

/// Failure to turn a content identifier into an [`Asset`](crate::Asset).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("content {content_id} not found")]
    NotFound { content_id: String },

    #[error("transient resolution failure: {reason}")]
    Transient { reason: String },

    #[error("malformed content metadata: {reason}")]
    Malformed { reason: String },
}

impl ResolutionError {
    pub fn not_found(content_id: impl Into<String>) -> Self {
        Self::NotFound {
            content_id: content_id.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Reporting category of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Connection,
    Timeout,
    HttpServerError,
    HttpClientError,
    SizeMismatch,
    Truncated,
    Io,
    Cancelled,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connection => "connection error",
            Self::Timeout => "timeout",
            Self::HttpServerError => "server error",
            Self::HttpClientError => "client error",
            Self::SizeMismatch => "size mismatch",
            Self::Truncated => "truncated transfer",
            Self::Io => "file error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("connection error: {reason}")]
    Connection { reason: String },

    #[error("request timed out: {reason}")]
    Timeout { reason: String },

    #[error("server responded with HTTP {status} for {url}")]
    HttpServerError { status: StatusCode, url: String },

    #[error("request rejected with HTTP {status} for {url}")]
    HttpClientError { status: StatusCode, url: String },

    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("{operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::HttpServerError {
                status,
                url: url.into(),
            }
        } else {
            Self::HttpClientError {
                status,
                url: url.into(),
            }
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Connection { .. } => FetchErrorKind::Connection,
            Self::Timeout { .. } => FetchErrorKind::Timeout,
            Self::HttpServerError { .. } => FetchErrorKind::HttpServerError,
            Self::HttpClientError { .. } => FetchErrorKind::HttpClientError,
            Self::SizeMismatch { .. } => FetchErrorKind::SizeMismatch,
            Self::Truncated { .. } => FetchErrorKind::Truncated,
            Self::Io { .. } => FetchErrorKind::Io,
            Self::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::HttpServerError { .. }
            | Self::SizeMismatch { .. }
            | Self::Truncated { .. } => true,
            Self::HttpClientError { .. } | Self::Io { .. } | Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                reason: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::http_status(status, err.url().map(|u| u.to_string()).unwrap_or_default())
        } else if err.is_body() || err.is_decode() {
            // Body errors surface mid-stream; the caller knows the byte counts.
            Self::Truncated {
                expected: 0,
                received: 0,
            }
        } else {
            Self::Connection {
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("cache file {} cannot be written: {source}", path.display())]
    Unwritable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("failed to build HTTP client: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("worker task failed: {reason}")]
    Worker { reason: String },
}

impl EngineError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

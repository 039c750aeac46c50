//! Operator-configured download targets.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;

static CONTENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d+)(?:/|$)").expect("content id regex is valid"));

/// Which destination root a target downloads into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Series,
    Movie,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Series => f.write_str("series"),
            Category::Movie => f.write_str("movie"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub category: Category,
    /// Only meaningful for series: expand to every episode of every season.
    pub fetch_all_episodes: bool,
}

impl Target {
    pub fn series(url: impl Into<String>, fetch_all_episodes: bool) -> Self {
        Self {
            url: url.into(),
            category: Category::Series,
            fetch_all_episodes,
        }
    }

    pub fn movie(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: Category::Movie,
            fetch_all_episodes: false,
        }
    }

    pub fn content_id(&self) -> Result<u64, ResolutionError> {
        extract_content_id(&self.url)
    }
}

/// Extract the numeric content id from a Jupiter URL such as
/// `https://jupiter.err.ee/1609219331/piia-seiklused`.
pub fn extract_content_id(url: &str) -> Result<u64, ResolutionError> {
    let captures = CONTENT_ID_RE
        .captures(url)
        .ok_or_else(|| ResolutionError::malformed(format!("no content id in URL `{url}`")))?;
    captures[1]
        .parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ResolutionError::malformed(format!("invalid content id in URL `{url}`")))
}

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::ResolutionError;
use crate::target::Category;

/// Where an asset came from, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetOrigin {
    pub target_url: String,
    pub category: Category,
    /// Series title when the asset was expanded from a series listing.
    pub series: Option<String>,
}

/// A resolved, downloadable media item. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Content id in the metadata API; the cache key.
    pub id: String,
    pub title: String,
    /// Sanitized file stem, without extension.
    pub file_name: String,
    pub source_url: String,
    pub destination: PathBuf,
    /// DRM-restricted content cannot be downloaded.
    pub protected: bool,
    pub expected_size: Option<u64>,
    pub origin: AssetOrigin,
}

impl Asset {
    /// Human-readable label used in logs and the run summary.
    pub fn label(&self) -> String {
        match &self.origin.series {
            Some(series) => format!("{series} - {} ({})", self.title, self.id),
            None => format!("{} ({})", self.title, self.id),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A content id that could not be turned into an [`Asset`].
#[derive(Debug, Clone)]
pub struct ResolutionFailure {
    /// Missing when the target URL itself carried no usable id.
    pub content_id: Option<String>,
    pub origin: AssetOrigin,
    pub error: ResolutionError,
}

impl ResolutionFailure {
    pub fn label(&self) -> String {
        let id = self.content_id.as_deref().unwrap_or("?");
        match &self.origin.series {
            Some(series) => format!("{series} - content {id}"),
            None => format!("{} (content {id})", self.origin.target_url),
        }
    }
}

/// One entry of a resolved target, in enumeration order.
#[derive(Debug, Clone)]
pub enum ResolvedItem {
    Asset(Asset),
    Failed(ResolutionFailure),
}

/// Everything a single target expanded into.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub series_name: Option<String>,
    pub items: Vec<ResolvedItem>,
}

impl Resolution {
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.items.iter().filter_map(|item| match item {
            ResolvedItem::Asset(asset) => Some(asset),
            ResolvedItem::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResolutionFailure> {
        self.items.iter().filter_map(|item| match item {
            ResolvedItem::Failed(failure) => Some(failure),
            ResolvedItem::Asset(_) => None,
        })
    }
}

//! Turns targets into concrete, downloadable assets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::api::{ContentPage, MetadataApi};
use crate::asset::{Asset, AssetOrigin, Resolution, ResolutionFailure, ResolvedItem};
use crate::config::DirectoriesConfig;
use crate::error::ResolutionError;
use crate::filename::sanitize_component;
use crate::retry::{Cancelled, RetryAction, RetryPolicy, retry_with_backoff};
use crate::target::{Category, Target};

const MEDIA_EXTENSION: &str = "mp4";

/// Episode lookups in flight per series. Results keep listing order.
const EPISODE_LOOKAHEAD: usize = 4;

impl From<Cancelled> for ResolutionError {
    fn from(_: Cancelled) -> Self {
        ResolutionError::transient("cancelled")
    }
}

pub struct AssetResolver {
    api: Arc<dyn MetadataApi>,
    directories: DirectoriesConfig,
    retry: RetryPolicy,
}

impl AssetResolver {
    pub fn new(api: Arc<dyn MetadataApi>, directories: DirectoriesConfig, retry: RetryPolicy) -> Self {
        Self {
            api,
            directories,
            retry,
        }
    }

    /// Resolve a target into its assets.
    ///
    /// Target-level problems (bad URL, missing content) fail the whole call;
    /// individual episodes that fail are recorded as [`ResolvedItem::Failed`]
    /// so the rest of the series still resolves.
    #[instrument(skip(self, target, cancel), fields(url = %target.url, category = %target.category))]
    pub async fn resolve(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolutionError> {
        let content_id = target.content_id()?;
        let origin = AssetOrigin {
            target_url: target.url.clone(),
            category: target.category,
            series: None,
        };

        if target.category == Category::Movie || !target.fetch_all_episodes {
            let page = self.fetch_page(content_id, cancel).await?;
            let asset = self.build_asset(content_id, &page, origin, None)?;
            return Ok(Resolution {
                series_name: None,
                items: vec![ResolvedItem::Asset(asset)],
            });
        }

        let page = self.fetch_page(content_id, cancel).await?;
        let series_name = series_name(&page);
        let episode_ids = page.episode_ids();

        if episode_ids.is_empty() {
            warn!(
                content_id,
                series = series_name.as_deref().unwrap_or(""),
                "No episodes listed, resolving as a single video"
            );
            let asset = self.build_asset(content_id, &page, origin, None)?;
            return Ok(Resolution {
                series_name,
                items: vec![ResolvedItem::Asset(asset)],
            });
        }

        info!(
            series = series_name.as_deref().unwrap_or(""),
            episodes = episode_ids.len(),
            "Resolving series"
        );

        let series_origin = AssetOrigin {
            series: series_name.clone(),
            ..origin
        };
        let page = &page;
        let series_origin = &series_origin;
        let folder = series_name.as_deref();
        let items = stream::iter(episode_ids)
            .map(|episode_id| async move {
                let resolved = if episode_id == content_id {
                    self.build_asset(episode_id, page, series_origin.clone(), folder)
                } else {
                    match self.fetch_page(episode_id, cancel).await {
                        Ok(episode_page) => self.build_asset(
                            episode_id,
                            &episode_page,
                            series_origin.clone(),
                            folder,
                        ),
                        Err(e) => Err(e),
                    }
                };
                match resolved {
                    Ok(asset) => ResolvedItem::Asset(asset),
                    Err(error) => {
                        warn!(episode_id, error = %error, "Episode failed to resolve");
                        ResolvedItem::Failed(ResolutionFailure {
                            content_id: Some(episode_id.to_string()),
                            origin: series_origin.clone(),
                            error,
                        })
                    }
                }
            })
            .buffered(EPISODE_LOOKAHEAD)
            .collect::<Vec<_>>()
            .await;

        Ok(Resolution { series_name, items })
    }

    async fn fetch_page(
        &self,
        content_id: u64,
        cancel: &CancellationToken,
    ) -> Result<ContentPage, ResolutionError> {
        retry_with_backoff(&self.retry, cancel, |_| async move {
            match self.api.content_page(content_id).await {
                Ok(page) => RetryAction::Success(page),
                Err(e) if e.is_retryable() => RetryAction::Retry(e),
                Err(e) => RetryAction::Fail(e),
            }
        })
        .await
    }

    fn build_asset(
        &self,
        content_id: u64,
        page: &ContentPage,
        origin: AssetOrigin,
        folder_override: Option<&str>,
    ) -> Result<Asset, ResolutionError> {
        let main = page
            .main_content
            .as_ref()
            .ok_or_else(|| ResolutionError::not_found(content_id.to_string()))?;

        let title = episode_title(
            first_non_empty(&[&main.stats_heading, &main.heading]).unwrap_or_default(),
            main.year().as_deref(),
        );
        let folder = folder_override
            .map(str::to_owned)
            .or_else(|| strip_dots(&main.heading))
            .unwrap_or_else(|| title.clone());

        let protected = main.is_drm_protected();
        let source_url = match main.media_url() {
            Some(url) => url,
            None if protected => String::new(),
            None => {
                return Err(ResolutionError::malformed(format!(
                    "content {content_id} has no media file"
                )));
            }
        };

        let file_name = sanitize_component(&title);
        let destination = destination_path(
            self.directories.root_for(origin.category),
            &sanitize_component(&folder),
            &file_name,
        );

        Ok(Asset {
            id: content_id.to_string(),
            title,
            file_name,
            source_url,
            destination,
            protected,
            expected_size: None,
            origin,
        })
    }
}

pub fn destination_path(root: &Path, folder: &str, file_name: &str) -> PathBuf {
    root.join(folder)
        .join(format!("{file_name}.{MEDIA_EXTENSION}"))
}

fn series_name(page: &ContentPage) -> Option<String> {
    let main = page.main_content.as_ref()?;
    strip_dots(&main.stats_series_title).or_else(|| strip_dots(&main.heading))
}

fn strip_dots(s: &str) -> Option<String> {
    let stripped = s.replace('.', "");
    let stripped = stripped.trim();
    (!stripped.is_empty()).then(|| stripped.to_string())
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

fn episode_title(heading: &str, year: Option<&str>) -> String {
    match year {
        Some(year) if !heading.contains(year) => format!("{heading} {year}").trim().to_string(),
        _ => heading.to_string(),
    }
}

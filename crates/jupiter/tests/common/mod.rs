#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use jupiter_engine::config::EngineConfig;
use jupiter_engine::{
    Asset, CancellationToken, CompletedFetch, ContentPage, Fetch, FetchError, FetchOutcome,
    MetadataApi, ResolutionError,
};
use parking_lot::Mutex;
use serde_json::json;

/// In-memory content-page API.
#[derive(Default)]
pub struct FakeApi {
    pages: HashMap<u64, ContentPage>,
    /// Remaining transient failures per id.
    flaky: Mutex<HashMap<u64, u32>>,
    calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_movie(mut self, id: u64, title: &str) -> Self {
        self.pages.insert(id, page(id, title, false, None));
        self
    }

    pub fn with_protected_movie(mut self, id: u64, title: &str) -> Self {
        self.pages.insert(id, page(id, title, true, None));
        self
    }

    /// A series page at `id` listing `episodes`, each with its own page titled
    /// by `title_of`.
    pub fn with_series(
        mut self,
        id: u64,
        name: &str,
        episodes: &[u64],
        title_of: impl Fn(u64) -> String,
    ) -> Self {
        let contents: Vec<_> = episodes.iter().map(|e| json!({ "id": e })).collect();
        let series = serde_json::from_value(json!({
            "mainContent": {
                "id": id,
                "heading": name,
                "statsHeading": name,
                "statsSeriesTitle": name,
                "medias": [{ "src": { "file": format!("//media.test/{id}.mp4") } }]
            },
            "seasonList": { "items": [{ "name": "1", "contents": contents }] }
        }))
        .unwrap();
        self.pages.insert(id, series);
        for &episode in episodes {
            self.pages
                .insert(episode, page(episode, &title_of(episode), false, Some(name)));
        }
        self
    }

    pub fn without(mut self, id: u64) -> Self {
        self.pages.remove(&id);
        self
    }

    pub fn flaky(self, id: u64, failures: u32) -> Self {
        self.flaky.lock().insert(id, failures);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn page(id: u64, title: &str, drm: bool, series: Option<&str>) -> ContentPage {
    let file = (!drm).then(|| format!("//media.test/{id}.mp4"));
    serde_json::from_value(json!({
        "mainContent": {
            "id": id,
            "heading": title,
            "statsHeading": title,
            "statsSeriesTitle": series.unwrap_or(""),
            "medias": [{
                "src": { "file": file },
                "restrictions": { "drm": drm }
            }]
        }
    }))
    .unwrap()
}

#[async_trait]
impl MetadataApi for FakeApi {
    async fn content_page(&self, content_id: u64) -> Result<ContentPage, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(remaining) = self.flaky.lock().get_mut(&content_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ResolutionError::transient("flaky"));
        }
        self.pages
            .get(&content_id)
            .cloned()
            .ok_or_else(|| ResolutionError::not_found(content_id.to_string()))
    }
}

pub const PAYLOAD: &[u8] = b"fake video payload";

/// Writes a fixed payload instead of downloading, finishing any prefix of it
/// already on disk the way a range request would.
#[derive(Default)]
pub struct FakeFetcher {
    fetched: Mutex<Vec<String>>,
    /// Bytes found at the destination when each fetch started.
    found_on_disk: Mutex<Vec<(String, u64)>>,
    failing: HashSet<String>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: u64) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    pub fn found_on_disk(&self) -> Vec<(String, u64)> {
        self.found_on_disk.lock().clone()
    }
}

#[async_trait]
impl Fetch for FakeFetcher {
    async fn fetch(
        &self,
        asset: &Asset,
        destination: &Path,
        _cancel: &CancellationToken,
    ) -> FetchOutcome {
        assert!(!asset.protected, "protected assets never reach the fetcher");
        self.fetched.lock().push(asset.id.clone());

        if self.failing.contains(&asset.id) {
            return FetchOutcome::Failed(FetchError::Connection {
                reason: "connection reset".to_string(),
            });
        }

        let existing = std::fs::metadata(destination).map(|m| m.len()).unwrap_or(0);
        self.found_on_disk.lock().push((asset.id.clone(), existing));
        if existing >= PAYLOAD.len() as u64 {
            return FetchOutcome::Completed(CompletedFetch {
                bytes_written: 0,
                file_size: existing,
            });
        }

        // Yield so concurrent workers interleave.
        tokio::task::yield_now().await;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(destination, PAYLOAD).unwrap();
        FetchOutcome::Completed(CompletedFetch {
            bytes_written: PAYLOAD.len() as u64 - existing,
            file_size: PAYLOAD.len() as u64,
        })
    }
}

pub fn config(root: &Path, workers: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.directories.tv_shows = root.join("tv_shows");
    config.directories.movies = root.join("movies");
    config.cache.file = root.join("downloads_cache.json");
    config.threading.use_threading = workers > 1;
    config.threading.max_workers = workers;
    config.resolve_retry.base_delay_ms = 1;
    config
}

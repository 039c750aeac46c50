//! Client for the ERR VOD content-page API.
//!
//! A request by content id returns the page model for that content: the main
//! item (title, media URLs, DRM restrictions) and, for series, the season list
//! used to enumerate episodes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::error::ResolutionError;

#[async_trait]
pub trait MetadataApi: Send + Sync {
    /// Fetch the content page for `content_id`.
    async fn content_page(&self, content_id: u64) -> Result<ContentPage, ResolutionError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPageResponse {
    #[serde(default)]
    pub data: Option<ContentPage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPage {
    #[serde(default)]
    pub main_content: Option<MainContent>,
    #[serde(default)]
    pub season_list: Option<SeasonList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainContent {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub stats_heading: String,
    #[serde(default)]
    pub stats_series_title: String,
    /// Sent as a number by most pages, occasionally as a string.
    #[serde(default)]
    pub year: Option<serde_json::Value>,
    #[serde(default)]
    pub medias: Vec<Media>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub src: Option<MediaSource>,
    #[serde(default)]
    pub restrictions: Option<Restrictions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaSource {
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Restrictions {
    #[serde(default)]
    pub drm: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeasonList {
    #[serde(default)]
    pub items: Vec<Season>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contents: Option<Vec<SeasonContent>>,
    #[serde(default)]
    pub first_content_id: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonContent {
    pub id: u64,
}

impl MainContent {
    pub fn year(&self) -> Option<String> {
        match self.year.as_ref()? {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    /// Absolute URL of the first media file, if the page exposes one.
    pub fn media_url(&self) -> Option<String> {
        let file = self.medias.first()?.src.as_ref()?.file.as_deref()?;
        let file = file.replace('\\', "");
        if file.is_empty() {
            None
        } else if file.starts_with("//") {
            Some(format!("https:{file}"))
        } else {
            Some(file)
        }
    }

    pub fn is_drm_protected(&self) -> bool {
        self.medias
            .first()
            .and_then(|m| m.restrictions.as_ref())
            .is_some_and(|r| r.drm)
    }
}

impl ContentPage {
    /// Episode ids across all seasons, in listing order.
    ///
    /// Seasons that only expose their first episode contribute that one id.
    pub fn episode_ids(&self) -> Vec<u64> {
        let Some(list) = &self.season_list else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        for season in &list.items {
            let before = ids.len();
            match (&season.contents, season.first_content_id) {
                (Some(contents), _) if !contents.is_empty() => {
                    ids.extend(contents.iter().map(|c| c.id));
                }
                (_, Some(first)) => ids.push(first),
                _ => {}
            }
            debug!(
                season = season.name.as_deref().unwrap_or("Unknown"),
                episodes = ids.len() - before,
                "Enumerated season"
            );
        }
        ids
    }
}

/// [`MetadataApi`] backed by the public HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ErrApiClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl ErrApiClient {
    pub fn new(client: Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl MetadataApi for ErrApiClient {
    #[instrument(skip(self), level = "debug")]
    async fn content_page(&self, content_id: u64) -> Result<ContentPage, ResolutionError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[("contentId", content_id)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ResolutionError::transient(format!("content {content_id}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ResolutionError::not_found(content_id.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolutionError::transient(format!(
                "content {content_id}: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(ResolutionError::malformed(format!(
                "content {content_id}: HTTP {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::transient(format!("content {content_id}: {e}")))?;
        let parsed: ContentPageResponse = serde_json::from_slice(&body).map_err(|e| {
            ResolutionError::malformed(format!("content {content_id}: invalid JSON: {e}"))
        })?;

        match parsed.data {
            Some(page) if page.main_content.is_some() => Ok(page),
            _ => Err(ResolutionError::not_found(content_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> ContentPage {
        serde_json::from_str::<ContentPageResponse>(json)
            .unwrap()
            .data
            .unwrap()
    }

    #[test]
    fn parses_movie_page() {
        let page = page(
            r#"{"data":{"mainContent":{
                "id":1609219331,"heading":"Piia seiklused","statsHeading":"Piia seiklused",
                "year":2023,
                "medias":[{"src":{"file":"\/\/vod.err.ee\/piia.mp4"},"restrictions":{"drm":false}}]
            }}}"#,
        );
        let main = page.main_content.unwrap();
        assert_eq!(main.year().as_deref(), Some("2023"));
        assert_eq!(main.media_url().as_deref(), Some("https://vod.err.ee/piia.mp4"));
        assert!(!main.is_drm_protected());
    }

    #[test]
    fn media_url_strips_backslashes_and_keeps_absolute_urls() {
        let main = MainContent {
            medias: vec![Media {
                src: Some(MediaSource {
                    file: Some("http:\\/\\/localhost\\/a.mp4".to_string()),
                }),
                restrictions: None,
            }],
            ..Default::default()
        };
        assert_eq!(main.media_url().as_deref(), Some("http://localhost/a.mp4"));
    }

    #[test]
    fn drm_flag_read_from_first_media() {
        let page = page(
            r#"{"data":{"mainContent":{"heading":"X",
                "medias":[{"src":{"file":"//x/y.mp4"},"restrictions":{"drm":true}}]}}}"#,
        );
        assert!(page.main_content.unwrap().is_drm_protected());
    }

    #[test]
    fn episode_ids_follow_season_order() {
        let page = page(
            r#"{"data":{"mainContent":{"heading":"S"},"seasonList":{"items":[
                {"name":"1","contents":[{"id":11},{"id":12}]},
                {"name":"2","firstContentId":21},
                {"name":"3","contents":[],"firstContentId":31},
                {"name":"4"}
            ]}}}"#,
        );
        assert_eq!(page.episode_ids(), vec![11, 12, 21, 31]);
    }

    #[test]
    fn string_year_accepted() {
        let main = MainContent {
            year: Some(serde_json::Value::String(" 1999 ".into())),
            ..Default::default()
        };
        assert_eq!(main.year().as_deref(), Some("1999"));
    }
}

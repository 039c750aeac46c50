//! Discovery mode: find seasons of configured series that are not configured.

use std::collections::HashSet;
use std::path::Path;

use jupiter_engine::api::Season;
use jupiter_engine::http::build_client;
use jupiter_engine::{ErrApiClient, MetadataApi, extract_content_id};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AppConfig, add_tv_shows};
use crate::error::{AppError, Result};

/// A season page that no configured URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSeason {
    /// Configured URL the season was found through.
    pub show_url: String,
    pub season: String,
    pub url: String,
}

/// Ids a season is reachable by: its episodes, or just its first one.
fn season_ids(season: &Season) -> Vec<u64> {
    let mut ids: Vec<u64> = season
        .contents
        .iter()
        .flatten()
        .map(|c| c.id)
        .collect();
    ids.extend(season.first_content_id);
    if let Some(id) = season.url.as_deref().and_then(|u| extract_content_id(u).ok()) {
        ids.push(id);
    }
    ids
}

fn season_url(show_url: &Url, season: &Season, first_id: u64) -> Option<String> {
    let reference = match season.url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => url.to_string(),
        None => format!("/{first_id}"),
    };
    show_url.join(&reference).ok().map(String::from)
}

/// Report every season reachable from `tv_shows` whose content ids are not
/// referenced by any configured URL. Shows that fail to load are skipped.
pub async fn discover_missing(api: &dyn MetadataApi, tv_shows: &[String]) -> Vec<DiscoveredSeason> {
    let mut known: HashSet<u64> = tv_shows
        .iter()
        .filter_map(|url| extract_content_id(url).ok())
        .collect();
    let mut found = Vec::new();

    for show_url in tv_shows {
        let (Ok(id), Ok(parsed)) = (extract_content_id(show_url), Url::parse(show_url)) else {
            warn!(url = %show_url, "Skipping invalid series URL");
            continue;
        };
        let page = match api.content_page(id).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url = %show_url, error = %e, "Could not load series");
                continue;
            }
        };

        for season in page.season_list.iter().flat_map(|list| &list.items) {
            let ids = season_ids(season);
            let Some(&first_id) = ids.first() else {
                continue;
            };
            if ids.iter().any(|id| known.contains(id)) {
                continue;
            }
            let Some(url) = season_url(&parsed, season, first_id) else {
                continue;
            };
            let name = season.name.clone().unwrap_or_else(|| "?".to_string());
            debug!(show = %show_url, season = %name, url = %url, "Found unconfigured season");
            known.extend(ids);
            found.push(DiscoveredSeason {
                show_url: show_url.clone(),
                season: name,
                url,
            });
        }
    }
    found
}

/// Run discovery against the live API and optionally write the results back.
pub async fn run_discovery(config: &AppConfig, config_path: &Path, add: bool) -> Result<usize> {
    info!("Looking for new season URLs");
    let base_url = Url::parse(&config.engine.api.base_url)
        .map_err(|e| AppError::InvalidInput(format!("api.base_url: {e}")))?;
    let client = build_client(&config.engine.http)?;
    let api = ErrApiClient::new(client, base_url, config.engine.http.timeout());

    let missing = discover_missing(&api, &config.tv_shows).await;
    if missing.is_empty() {
        info!(path = %config_path.display(), "All seasons are already configured");
        return Ok(0);
    }

    info!(count = missing.len(), "Found new season URLs");
    for season in &missing {
        println!("{}  (season {} of {})", season.url, season.season, season.show_url);
    }

    if add {
        let urls: Vec<String> = missing.iter().map(|s| s.url.clone()).collect();
        let added = add_tv_shows(config_path, &urls)?;
        info!(added, path = %config_path.display(), "Configuration updated");
        Ok(added)
    } else {
        println!("Run again with --discover --add to append them to the configuration.");
        Ok(missing.len())
    }
}

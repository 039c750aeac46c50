//! TOML configuration file.
//!
//! ```toml
//! tv_shows = ["https://jupiter.err.ee/1038081/onne-13"]
//! movies = ["https://jupiter.err.ee/1609219331/piia-seiklused"]
//!
//! [directories]
//! tv_shows = "downloads/tv_shows"
//! movies = "downloads/movies"
//!
//! [threading]
//! use_threading = true
//! max_workers = 4
//! ```
//!
//! Every engine section is optional and falls back to its default.

use std::path::{Path, PathBuf};

use jupiter_engine::{EngineConfig, Target};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Series URLs.
    pub tv_shows: Vec<String>,
    /// Movie URLs.
    pub movies: Vec<String>,
    pub logging: LoggingConfig,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Log file base path; rotated daily. No file logging when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("logs/jupiter.log")),
        }
    }
}

/// Pick the configuration file: an explicit path wins, then `./config.toml`,
/// then `config.toml` in the user config directory.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("jupiter").join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            path = %path.display(),
            tv_shows = config.tv_shows.len(),
            movies = config.movies.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Series first, then movies, in file order.
    pub fn targets(&self) -> Vec<Target> {
        let all_episodes = self.engine.download.download_all_episodes;
        self.tv_shows
            .iter()
            .map(|url| Target::series(url.as_str(), all_episodes))
            .chain(self.movies.iter().map(|url| Target::movie(url.as_str())))
            .collect()
    }
}

/// Append `urls` to the `tv_shows` list of the file at `path`.
///
/// The list ends up sorted and free of duplicates. Everything else in the file
/// is kept, though comments are lost on rewrite. Returns how many URLs were new.
pub fn add_tv_shows(path: &Path, urls: &[String]) -> Result<usize> {
    let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut table: toml::Table = toml::from_str(&text).map_err(|source| AppError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut shows: Vec<String> = match table.get("tv_shows") {
        Some(toml::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        Some(_) => {
            return Err(AppError::InvalidInput(format!(
                "tv_shows in {} is not a list",
                path.display()
            )));
        }
        None => Vec::new(),
    };

    let mut added = 0;
    for url in urls.iter().filter(|u| !u.is_empty()) {
        if !shows.contains(url) {
            shows.push(url.clone());
            added += 1;
        }
    }

    if added > 0 {
        shows.sort();
        shows.dedup();
        table.insert(
            "tv_shows".to_string(),
            toml::Value::Array(shows.into_iter().map(toml::Value::String).collect()),
        );
        std::fs::write(path, toml::to_string_pretty(&table)?)?;
    }
    Ok(added)
}

//! Console and file logging.
//!
//! Console output goes through the indicatif layer so log lines and download
//! progress bars do not overwrite each other. File output, when configured,
//! rotates daily and keeps two weeks of history.

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};

/// Rotated log files kept on disk.
const LOG_RETENTION_FILES: usize = 14;

/// Noisy dependencies capped regardless of the configured level.
const DEPENDENCY_DIRECTIVES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Keeps the background file writer alive. Drop it last.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn filter(config: &LoggingConfig, verbose: bool, quiet: bool) -> Result<EnvFilter> {
    if quiet {
        return Ok(EnvFilter::new("error"));
    }
    let level = if verbose {
        "debug".to_string()
    } else if let Ok(from_env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        return EnvFilter::try_new(&from_env)
            .map_err(|e| AppError::Logging(format!("invalid RUST_LOG '{from_env}': {e}")));
    } else {
        config.level.clone()
    };
    EnvFilter::try_new(format!("{level},{DEPENDENCY_DIRECTIVES}"))
        .map_err(|e| AppError::Logging(format!("invalid log level '{level}': {e}")))
}

pub fn init_logging(config: &LoggingConfig, verbose: bool, quiet: bool) -> Result<LoggingGuard> {
    let filter = filter(config, verbose, quiet)?;
    let indicatif_layer = IndicatifLayer::new();

    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(LocalTimer)
        .with_writer(indicatif_layer.get_stderr_writer());

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let prefix = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "jupiter.log".to_string());
            std::fs::create_dir_all(dir)?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(prefix)
                .max_log_files(LOG_RETENTION_FILES)
                .build(dir)
                .map_err(|e| AppError::Logging(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(LocalTimer)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(indicatif_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

use std::path::PathBuf;

use jupiter_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Cannot serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

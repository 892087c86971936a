use thiserror::Error;

use crate::params::ValidationError;

/// Main error type for the miner supervisor
#[derive(Error, Debug)]
pub enum MinerdError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Launch parameter errors
    #[error("Invalid launch parameters: {0}")]
    Validation(#[from] ValidationError),

    // Worker lifecycle errors
    #[error("Worker spawn failed: {0}")]
    WorkerSpawn(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MinerdError
pub type Result<T> = std::result::Result<T, MinerdError>;

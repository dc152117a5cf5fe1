//! Error types for the server application

use thiserror::Error;

/// Server application error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] grid_ensemble_core::Error),

    #[error("Agent error: {0}")]
    Agents(#[from] grid_ensemble_agents::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for server operations
pub type Result<T> = std::result::Result<T, Error>;

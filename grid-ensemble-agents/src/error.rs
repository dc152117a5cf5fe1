//! Error types for agent operations

use grid_ensemble_core::envelope::{ErrorCode, ResponseError};
use thiserror::Error;

/// Agent error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Peer call {agent_id}.{method} failed with {code}: {message}")]
    Peer {
        agent_id: String,
        method: String,
        code: ErrorCode,
        message: String,
    },

    #[error("Peer call {agent_id}.{method} failed: dispatcher has shut down")]
    Detached { agent_id: String, method: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] grid_ensemble_core::Error),
}

impl Error {
    pub fn invalid_params<S: Into<String>>(message: S) -> Self {
        Self::InvalidParams(message.into())
    }

    /// Wrap the error envelope returned by another agent
    pub fn peer(agent_id: &str, method: &str, error: ResponseError) -> Self {
        Self::Peer {
            agent_id: agent_id.to_string(),
            method: method.to_string(),
            code: error.code,
            message: error.message,
        }
    }

    /// Error code reported by a peer, if this is a peer failure
    pub fn peer_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Peer { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Convenience result type for agent operations
pub type Result<T> = std::result::Result<T, Error>;

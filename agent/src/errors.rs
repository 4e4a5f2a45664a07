//! Error types for piped

use thiserror::Error;

use crate::rpc::status::{RpcCode, RpcError};

/// Main error type for piped
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Plugin error: {0}")]
    PluginError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Deploy source error: {0}")]
    DeploySourceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// The canonical status code carried by this error.
    pub fn code(&self) -> RpcCode {
        match self {
            AgentError::Rpc(e) => e.code,
            AgentError::HttpError(e) if e.is_timeout() => RpcCode::DeadlineExceeded,
            AgentError::HttpError(e) if e.is_decode() => RpcCode::Internal,
            AgentError::HttpError(_) => RpcCode::Unavailable,
            AgentError::NotFound(_) => RpcCode::NotFound,
            AgentError::ValidationError(_) | AgentError::ConfigError(_) => {
                RpcCode::InvalidArgument
            }
            AgentError::Cancelled(_) => RpcCode::Cancelled,
            _ => RpcCode::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == RpcCode::NotFound
    }

    pub fn is_unimplemented(&self) -> bool {
        self.code() == RpcCode::Unimplemented
    }

    /// Whether retrying the failed call may succeed.
    ///
    /// Only transport and RPC failures are retriable; local failures such as
    /// decoding or filesystem errors are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            AgentError::Rpc(_) | AgentError::HttpError(_) => self.code().is_retriable(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

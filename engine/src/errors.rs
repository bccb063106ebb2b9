//! Error types for the Wharf engine

use thiserror::Error;

/// Main error type for the Wharf engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Port range exhausted: {0}")]
    PortExhausted(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Proxy provisioning failed: {0}")]
    ProxyError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

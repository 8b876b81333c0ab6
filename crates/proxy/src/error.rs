//! Error types for hostgate-proxy

use config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No service matches host '{0}'")]
    ServiceNotFound(String),

    #[error("No endpoint could fulfil the request for service '{0}'")]
    NoAvailableEndpoints(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Invalid service definition: {0}")]
    InvalidServiceDefinition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ProxyError {
    /// HTTP status code reported to the client for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::ServiceNotFound(_) => 404,
            ProxyError::NoAvailableEndpoints(_) => 503,
            ProxyError::BadRequest(_) => 400,
            _ => 500,
        }
    }
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidServiceDefinition(msg) => ProxyError::InvalidServiceDefinition(msg),
            other => ProxyError::InvalidServiceDefinition(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

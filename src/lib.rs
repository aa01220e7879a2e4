//! h2fetch: a multiplexed HTTP/2 fetcher
//!
//! This crate fetches URIs over one persistent HTTP/2 connection per origin,
//! optionally follows same-origin assets linked from the fetched pages,
//! transparently inflates gzip/deflate bodies and records per-request timing.

pub mod config;
pub mod crawler;
pub mod decode;
pub mod driver;
pub mod engine;
pub mod output;
pub mod request;
pub mod session;
pub mod state;
pub mod transport;
pub mod url;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for h2fetch operations
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("Could not connect to {origin}: {source}")]
    Connect {
        origin: String,
        source: std::io::Error,
    },

    #[error("Connection to {origin} timed out")]
    ConnectTimeout { origin: String },

    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Engine(#[source] engine::EngineError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::ConnectionState,
        to: state::ConnectionState,
    },
}

impl From<engine::EngineError> for FetchError {
    fn from(err: engine::EngineError) -> Self {
        match err {
            engine::EngineError::Io(e) => Self::Io(e),
            other => Self::Engine(other),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),
}

/// TLS setup errors
///
/// All of these happen before a connection attempt is made.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Client certificate and private key must be given together")]
    IncompleteClientAuth,

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("TLS context error: {0}")]
    Context(#[from] rustls::Error),
}

/// Result type alias for h2fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use driver::{Driver, DriverReport};
pub use state::ConnectionState;
pub use url::{Origin, RequestUri};

//! Error types shared across the cache, fetch and configuration layers.
//!
//! Public cache and provider operations never surface these to callers that
//! render data: they are logged and collapsed into `false`/`None` at the
//! facade boundary. They exist so the layers underneath can use `?`.

use std::path::PathBuf;

use thiserror::Error;

/// Failures inside the disk-backed cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload rejected: {0}")]
    InvalidPayload(&'static str),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Failures of an outbound HTTP request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("certificate validation failed for {url}: {message}")]
    Trust { url: String, message: String },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] std::io::Error),

    #[error("invalid JSON in response: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// True for certificate-validation failures, the only class that may be
    /// retried with verification disabled.
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, FetchError::Trust { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Failures loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the user configuration directory")]
    NoConfigDir,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Failures assembling the cache and clients at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("HTTP client setup failed: {0}")]
    Fetch(#[from] FetchError),
}

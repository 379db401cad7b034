//! Error types shared by every part of the toolbar core.
//!
//! Only [`ConfigError`] is ever fatal. Everything else is caught by the
//! reconciliation flow, logged, and turned into "no session for this load".

use thiserror::Error;

/// Startup configuration problems. These abort initialization.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No CMS endpoint was configured at all
    #[error("preview toolbar requires a CMS endpoint (set PRISMIC_ENDPOINT)")]
    MissingEndpoint,
    /// The endpoint does not look like `http(s)://host/...`
    #[error("invalid CMS endpoint: {0}")]
    InvalidEndpoint(String),
    /// The page URL could not be parsed into a location
    #[error("invalid page location: {0}")]
    InvalidLocation(String),
}

#[derive(Debug, Error)]
pub enum ToolbarError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport-level failure (DNS, connection refused, TLS...)
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The host environment refused an operation (frame gone, channel closed...)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Another `post` with the same message type is still waiting for its reply
    #[error("a listener for message type `{0}` is already pending")]
    ListenerBusy(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl From<reqwest::Error> for ToolbarError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ToolbarError::Status(status.as_u16()),
            None => ToolbarError::Network(err.to_string()),
        }
    }
}

pub type Result<T, E = ToolbarError> = std::result::Result<T, E>;

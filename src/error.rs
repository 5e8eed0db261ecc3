// Error type shared by every library module. Binaries wrap it in
// `anyhow::Error`; the library keeps it typed so callers can match on
// HTTP failures, search timeouts and bad parameters separately.

use thiserror::Error;

/// Errors raised while talking to QRadar or the incident platform.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The server answered with a non-2xx status.
    #[error("Response from server: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Failed to send request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Search {search_id} took longer than {secs} seconds to complete so we quit trying")]
    SearchTimeout { search_id: String, secs: u64 },

    #[error("Search {search_id} ended with status {status}")]
    SearchFailed { search_id: String, status: String },

    #[error("Missing required parameter `{0}`")]
    MissingParam(String),

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("Unsupported request method: {0}")]
    UnsupportedMethod(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConnectorError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConnectorError::InvalidParam {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status carried by the error, if it came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectorError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias used across the connector.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

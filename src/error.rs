//! Error types
//!
//! Three families, matching how a run can go wrong:
//!
//! - [`ConfigError`]: a required input is missing or malformed. Fatal before
//!   any check executes.
//! - [`ProbeError`]: a check could not complete because the gateway could not
//!   be observed (transport failure, timeout, unexpected response shape). Always
//!   recorded as an ERROR outcome.
//! - [`DeliveryError`]: an evidence record could not be handed to the
//!   evidence service. Reported separately; never changes a check result.

use thiserror::Error;

/// Result type alias for probe operations
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Configuration errors raised while building a [`crate::RunConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required variable absent or empty
    #[error("Missing required environment variable: {name}")]
    Missing { name: &'static str },

    /// Variable present but not usable
    #[error("Invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    /// Region not in the recognised set
    #[error("Unknown control-plane region: {region}. Valid options: us, eu, au")]
    UnknownRegion { region: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            message: message.into(),
        }
    }
}

/// Failures observing the gateway
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connection, TLS or timeout failure
    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    /// Control-plane API answered with a non-success status
    #[error("control plane returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Response body did not have the expected shape
    #[error("unexpected response from {url}: {message}")]
    Malformed { url: String, message: String },

    /// No control plane with the configured name
    #[error("control plane '{name}' not found")]
    ControlPlaneNotFound { name: String },

    /// Pagination did not terminate within the page budget
    #[error("pagination for {url} exceeded {pages} pages")]
    TooManyPages { url: String, pages: usize },

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ProbeError {
    pub(crate) fn transport(url: impl Into<String>, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timed out: {err}")
        } else {
            err.to_string()
        };
        Self::Transport {
            url: url.into(),
            message,
        }
    }

    pub(crate) fn malformed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Failures delivering one evidence record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Could not reach the evidence service
    #[error("transport error: {0}")]
    Transport(String),

    /// Evidence service rejected the submission
    #[error("evidence service returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Record could not be serialized for submission or output
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local dry-run sink failed to write
    #[error("output error: {0}")]
    Output(String),
}

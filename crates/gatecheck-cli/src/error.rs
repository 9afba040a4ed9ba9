//! Error types for the gatecheck CLI

use std::path::PathBuf;

use gatecheck::evidence::SigningError;
use gatecheck::observability::ObservabilityError;
use gatecheck::{ConfigError, EXIT_CHECK_ERROR, EXIT_CONFIG_ERROR};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Environment configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid command-line value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Logging could not be initialised
    #[error("Failed to initialise logging: {0}")]
    Observability(#[from] ObservabilityError),

    /// Report file could not be written
    #[error("Failed to write report {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report file could not be read
    #[error("Failed to read report {path}: {source}")]
    ReportRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Signing or verification failed
    #[error("Report signature error: {0}")]
    Signing(#[from] SigningError),

    /// Report signature did not match
    #[error("Report signature does not match: {path} may have been modified")]
    SignatureMismatch { path: PathBuf },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Create an invalid value error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::InvalidValue { .. } => EXIT_CONFIG_ERROR,
            _ => EXIT_CHECK_ERROR,
        }
    }
}

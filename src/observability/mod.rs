//! Observability
//!
//! Structured logging for compliance runs. Library code uses the standard
//! `tracing` macros; this module installs the subscriber once at startup and
//! defines the audit event taxonomy emitted by the orchestrator and the
//! evidence sinks.
//!
//! # Usage
//!
//! ```ignore
//! use gatecheck::observability::{ObservabilityConfig, init};
//!
//! let config = ObservabilityConfig::from_env().verbose(true);
//! init(&config)?;
//! ```

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig};
pub use events::{audit_event, AuditEvent, Severity};

use tracing::debug;

/// Initialize the tracing subscriber.
///
/// Must be called once, before any logging occurs. A second call returns
/// [`ObservabilityError::Provider`] instead of replacing the subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;

    debug!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Observability initialized"
    );

    Ok(())
}

/// Observability initialization errors
#[derive(Debug)]
pub enum ObservabilityError {
    /// Invalid configuration
    Config(String),
    /// Subscriber installation failed
    Provider(String),
}

impl std::fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Observability config error: {}", msg),
            Self::Provider(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl std::error::Error for ObservabilityError {}

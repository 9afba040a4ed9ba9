//! Audit Event Logging
//!
//! Structured log events for everything a reviewer may want to reconstruct
//! from a run's logs: which checks ran, what they concluded, and whether the
//! evidence reached the evidence service.
//!
//! # Usage
//!
//! ```ignore
//! use gatecheck::observability::{AuditEvent, audit_event};
//!
//! audit_event!(
//!     AuditEvent::CheckFailed,
//!     test_id = "CF-003",
//!     duration_ms = 41,
//!     "Check failed"
//! );
//! ```

use std::fmt;

/// Audit event types emitted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    // Run lifecycle
    /// Orchestrator started a pass over the catalog
    RunStarted,
    /// Orchestrator finished every catalog entry
    RunCompleted,
    /// Configuration could not be loaded
    ConfigurationRejected,

    // Check outcomes
    /// Check assertion held
    CheckPassed,
    /// Check assertion did not hold
    CheckFailed,
    /// Check could not complete
    CheckErrored,

    // Evidence delivery
    /// Run downgraded to dry-run delivery
    DryRunForced,
    /// Record accepted by the evidence service
    EvidenceDelivered,
    /// Record could not be delivered after retries
    EvidenceDeliveryFailed,
}

impl AuditEvent {
    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::RunStarted | Self::RunCompleted | Self::ConfigurationRejected => "run",

            Self::CheckPassed | Self::CheckFailed | Self::CheckErrored => "check",

            Self::DryRunForced | Self::EvidenceDelivered | Self::EvidenceDeliveryFailed => {
                "evidence"
            }
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            Self::ConfigurationRejected | Self::CheckErrored | Self::EvidenceDeliveryFailed => {
                Severity::High
            }

            Self::CheckFailed | Self::DryRunForced => Severity::Medium,

            Self::RunStarted | Self::RunCompleted | Self::CheckPassed | Self::EvidenceDelivered => {
                Severity::Low
            }
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::RunCompleted => "run_completed",
            Self::ConfigurationRejected => "configuration_rejected",
            Self::CheckPassed => "check_passed",
            Self::CheckFailed => "check_failed",
            Self::CheckErrored => "check_errored",
            Self::DryRunForced => "dry_run_forced",
            Self::EvidenceDelivered => "evidence_delivered",
            Self::EvidenceDeliveryFailed => "evidence_delivery_failed",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine progress
    Low,
    /// Compliance finding or degraded mode
    Medium,
    /// Run integrity at risk
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Log an audit event with structured fields.
///
/// The macro automatically includes `audit_event`, `category` and
/// `severity`. High maps to `error`, medium to `warn`, low to `info`.
#[macro_export]
macro_rules! audit_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let category = event.category();
        let event_name = event.name();

        match event.severity() {
            $crate::observability::Severity::High => {
                ::tracing::error!(
                    audit_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::warn!(
                    audit_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::info!(
                    audit_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use audit_event;

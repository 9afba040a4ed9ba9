//! # gatecheck
//!
//! Compliance checks for API gateway authentication and rate limiting, with
//! audit-grade evidence delivery.
//!
//! A run executes a fixed catalog of checks against one gateway deployment,
//! records each outcome as a timestamped evidence record, and submits the
//! records to a compliance-evidence service (or writes them locally in
//! dry-run mode).
//!
//! ## Checks
//!
//! - **Runtime** (live traffic through the data plane): per-tier rate limits
//!   (200 vs 429 counts), invalid and missing key rejection (401 with no
//!   consumer identity), valid key acceptance and consumer identity
//!   injection.
//! - **Configuration** (read from the control-plane admin API): key-auth
//!   enabled, rate limiting enabled per consumer, every consumer covered by
//!   a rate limit.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gatecheck::{Orchestrator, RunConfig};
//! use gatecheck::observability::{ObservabilityConfig, init};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init(&ObservabilityConfig::from_env())?;
//!
//!     let config = RunConfig::from_env()?;
//!     let orchestrator = Orchestrator::from_config(&config, std::io::stdout());
//!     let outcome = orchestrator.run().await;
//!
//!     std::process::exit(outcome.exit_code().into());
//! }
//! ```
//!
//! ## Outcomes
//!
//! - `PASS` / `FAIL`: the check ran and its assertion held or did not. FAIL
//!   is a recorded finding and does not fail the process.
//! - `ERROR`: the gateway could not be observed. Any ERROR makes the process
//!   exit non-zero.
//!
//! Evidence delivery failures are reported separately and never change a
//! result.

pub mod catalog;
pub mod checks;
mod config;
pub mod error;
pub mod evidence;
pub mod observability;
pub mod orchestrator;
mod parse;
pub mod probe;

// Re-exports
pub use catalog::catalog;
pub use checks::{TestCase, TestIdentity, TestOutcome, TestStatus};
pub use config::{
    Credential, DeliveryMode, DryRunReason, EvidenceConfig, GatewayCredentialSet, Region,
    RunConfig, DEFAULT_CONTROL_PLANE_NAME, DEFAULT_EVIDENCE_API_BASE, DEFAULT_PROBE_TIMEOUT,
};
pub use error::{ConfigError, DeliveryError, ProbeError};
pub use evidence::{EvidenceRecord, RunReport};
pub use orchestrator::{
    Orchestrator, RunOutcome, RunSummary, EXIT_CHECK_ERROR, EXIT_CONFIG_ERROR, EXIT_OK,
};
pub use parse::{parse_bool, parse_duration};

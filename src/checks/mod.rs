//! Compliance checks
//!
//! A check is one verifiable claim about gateway behavior. Every check kind
//! is a variant of [`TestCase`] and shares one contract:
//! [`TestCase::execute`] observes the gateway through a [`ProbeContext`]
//! and returns a [`TestOutcome`].
//!
//! Outcome semantics:
//!
//! - `PASS` / `FAIL`: the assertion was evaluated. An expected rejection
//!   (a 401 for a missing key, a 429 past the limit) is an observation and
//!   feeds the assertion; it is never an error.
//! - `ERROR`: the gateway could not be observed. Checks return
//!   `Err(ProbeError)` for transport failures and malformed responses; the
//!   orchestrator records those as ERROR.

mod configuration;
mod runtime;

pub use configuration::{ConsumerCoverageCheck, PluginEnabledCheck, ScopeRequirement};
pub use runtime::{
    IdentityExpectation, IdentityInjectionCheck, KeyRejectionCheck, PresentedKey, TierLimitCheck,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProbeResult;
use crate::evidence::EvidenceArtifact;
use crate::probe::{ControlPlane, DataPlane};

/// Check-specific measurements, keyed by name
pub type Details = serde_json::Map<String, serde_json::Value>;

/// Result status of one check execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    /// Assertion evaluated and held
    Pass,
    /// Assertion evaluated and did not hold
    Fail,
    /// Execution could not complete
    Error,
}

impl TestStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestIdentity {
    id: String,
    name: String,
    control_mapping: Vec<String>,
}

impl TestIdentity {
    /// Create an identity. Duplicate control tags are dropped, first
    /// occurrence wins.
    pub fn new(id: impl Into<String>, name: impl Into<String>, controls: &[&str]) -> Self {
        let mut control_mapping: Vec<String> = Vec::with_capacity(controls.len());
        for control in controls {
            if !control_mapping.iter().any(|c| c == control) {
                control_mapping.push((*control).to_string());
            }
        }
        Self {
            id: id.into(),
            name: name.into(),
            control_mapping,
        }
    }

    /// Short code, e.g. "RT-001"
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Control-framework tags this check substantiates
    pub fn control_mapping(&self) -> &[String] {
        &self.control_mapping
    }
}

/// What one execution concluded
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    /// Result status
    pub status: TestStatus,
    /// Check-specific measurements
    pub details: Details,
    /// Supporting payloads, in capture order
    pub artifacts: Vec<EvidenceArtifact>,
    /// Why execution could not complete; set only for ERROR
    pub error_message: Option<String>,
}

impl TestOutcome {
    /// Outcome of an evaluated assertion
    pub fn assertion(passed: bool, details: Details, artifacts: Vec<EvidenceArtifact>) -> Self {
        Self {
            status: if passed { TestStatus::Pass } else { TestStatus::Fail },
            details,
            artifacts,
            error_message: None,
        }
    }

    /// Execution could not complete; details are empty
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Error,
            details: Details::new(),
            artifacts: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    /// Execution could not produce a trustworthy verdict, but partial
    /// measurements are still worth keeping
    pub fn error_with_details(
        message: impl Into<String>,
        details: Details,
        artifacts: Vec<EvidenceArtifact>,
    ) -> Self {
        Self {
            status: TestStatus::Error,
            details,
            artifacts,
            error_message: Some(message.into()),
        }
    }
}

/// Convert a JSON object into [`Details`]; non-objects land under `result`
pub fn details(value: serde_json::Value) -> Details {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = Details::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

/// Rate-limit window handling for traffic checks.
///
/// The gateway's per-consumer counters are shared state owned by the
/// gateway. Traffic checks never reset them; they start on a fresh window
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Length of the gateway's rate-limit window
    pub period: Duration,
    /// Sleep to the next window boundary before sending traffic
    pub wait_for_rollover: bool,
    /// Extra delay after the boundary to absorb clock skew with the gateway
    pub settle: Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            wait_for_rollover: true,
            settle: Duration::from_secs(1),
        }
    }
}

impl WindowPolicy {
    /// Policy that never waits; for gateways whose windows are managed
    /// externally and for tests
    pub fn immediate() -> Self {
        Self {
            wait_for_rollover: false,
            ..Self::default()
        }
    }

    /// Sleep until a fresh window has started
    pub async fn wait_for_fresh_window(&self) {
        if !self.wait_for_rollover {
            return;
        }
        let delay = until_next_window(Utc::now(), self.period) + self.settle;
        debug!(delay_ms = delay.as_millis() as u64, "Waiting for rate-limit window rollover");
        tokio::time::sleep(delay).await;
    }
}

/// Time from `now` to the next wall-clock multiple of `period`.
///
/// Exactly on a boundary the window has just opened and the delay is zero.
pub fn until_next_window(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis() as i64;
    if period_ms <= 0 {
        return Duration::ZERO;
    }
    let into_window = now.timestamp_millis().rem_euclid(period_ms);
    if into_window == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((period_ms - into_window) as u64)
    }
}

/// Handles a check needs to observe the gateway.
///
/// Owned by the orchestrator and passed into every execution.
#[derive(Clone)]
pub struct ProbeContext {
    /// Admin API reader
    pub control_plane: Arc<dyn ControlPlane>,
    /// Live traffic client
    pub data_plane: Arc<dyn DataPlane>,
    /// Rate-limit window handling
    pub window: WindowPolicy,
}

impl ProbeContext {
    /// Bundle probe handles
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        data_plane: Arc<dyn DataPlane>,
        window: WindowPolicy,
    ) -> Self {
        Self {
            control_plane,
            data_plane,
            window,
        }
    }
}

impl fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeContext")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Every check kind the catalog can contain
#[derive(Debug, Clone)]
pub enum TestCase {
    /// Burst of requests with one tier's key; counts 200 vs 429
    TrafficTierLimit(TierLimitCheck),
    /// Request with an invalid or missing key must be rejected anonymously
    KeyRejection(KeyRejectionCheck),
    /// Request with a valid key must be accepted and attributed
    IdentityInjection(IdentityInjectionCheck),
    /// A plugin must be enabled at the required scope
    PluginEnabled(PluginEnabledCheck),
    /// Every consumer must be covered by a rate-limit plugin
    ConsumerCoverage(ConsumerCoverageCheck),
}

impl TestCase {
    /// Identity of this check
    pub fn identity(&self) -> &TestIdentity {
        match self {
            Self::TrafficTierLimit(c) => &c.identity,
            Self::KeyRejection(c) => &c.identity,
            Self::IdentityInjection(c) => &c.identity,
            Self::PluginEnabled(c) => &c.identity,
            Self::ConsumerCoverage(c) => &c.identity,
        }
    }

    /// Kind name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TrafficTierLimit(_) => "traffic_tier_limit",
            Self::KeyRejection(_) => "key_rejection",
            Self::IdentityInjection(_) => "identity_injection",
            Self::PluginEnabled(_) => "plugin_enabled",
            Self::ConsumerCoverage(_) => "consumer_coverage",
        }
    }

    /// Whether the check sends live traffic
    pub fn generates_traffic(&self) -> bool {
        matches!(
            self,
            Self::TrafficTierLimit(_) | Self::KeyRejection(_) | Self::IdentityInjection(_)
        )
    }

    /// Run the check once.
    ///
    /// Returns `Err` only when the gateway could not be observed.
    pub async fn execute(&self, ctx: &ProbeContext) -> ProbeResult<TestOutcome> {
        match self {
            Self::TrafficTierLimit(c) => c.execute(ctx).await,
            Self::KeyRejection(c) => c.execute(ctx).await,
            Self::IdentityInjection(c) => c.execute(ctx).await,
            Self::PluginEnabled(c) => c.execute(ctx).await,
            Self::ConsumerCoverage(c) => c.execute(ctx).await,
        }
    }
}

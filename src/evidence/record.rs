//! Evidence records and their supporting artifacts

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::checks::{Details, TestIdentity, TestOutcome, TestStatus};
use crate::probe::ProbeResponse;

/// Kind of supporting payload attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Aggregated measurements, e.g. per-request status codes
    TestResults,
    /// A data-plane response: status, headers, leading body bytes
    HttpResponse,
    /// Control-plane configuration as observed
    ConfigSnapshot,
}

/// Opaque supporting payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    /// Payload kind
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    /// What the payload shows
    pub description: String,
    /// The payload
    pub data: serde_json::Value,
}

/// Gathers artifacts while a check runs
#[derive(Debug, Default)]
pub struct ArtifactCollector {
    artifacts: Vec<EvidenceArtifact>,
}

impl ArtifactCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record aggregated measurements
    pub fn test_results<V: Serialize>(&mut self, description: impl Into<String>, data: V) {
        self.push(ArtifactKind::TestResults, description, data);
    }

    /// Record a data-plane response
    pub fn http_response(&mut self, description: impl Into<String>, response: &ProbeResponse) {
        self.artifacts.push(EvidenceArtifact {
            kind: ArtifactKind::HttpResponse,
            description: description.into(),
            data: response.artifact(),
        });
    }

    /// Record observed configuration
    pub fn config_snapshot<V: Serialize>(&mut self, description: impl Into<String>, config: V) {
        self.push(ArtifactKind::ConfigSnapshot, description, config);
    }

    fn push<V: Serialize>(&mut self, kind: ArtifactKind, description: impl Into<String>, data: V) {
        let description = description.into();
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(artifact = %description, error = %e, "Artifact could not be serialized");
                serde_json::json!({ "serialization_error": e.to_string() })
            }
        };
        self.artifacts.push(EvidenceArtifact {
            kind,
            description,
            data,
        });
    }

    /// Consume the collector, yielding artifacts in capture order
    pub fn into_artifacts(self) -> Vec<EvidenceArtifact> {
        self.artifacts
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Immutable record of one check execution.
///
/// Built by the orchestrator once the check returns; the serialized field
/// set is what the evidence service receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Check id
    pub test_id: String,
    /// Check name
    pub test_name: String,
    /// When the check started (UTC)
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Result status
    pub result: TestStatus,
    /// Control tags
    pub control_mapping: Vec<String>,
    /// Wall-clock execution time
    pub duration_ms: u64,
    /// Check-specific measurements
    pub details: Details,
    /// Supporting payloads
    pub artifacts: Vec<EvidenceArtifact>,
    /// Present only for ERROR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EvidenceRecord {
    /// Combine a check's identity with what it concluded
    pub fn new(
        identity: &TestIdentity,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        outcome: TestOutcome,
    ) -> Self {
        Self {
            test_id: identity.id().to_string(),
            test_name: identity.name().to_string(),
            timestamp: started_at,
            result: outcome.status,
            control_mapping: identity.control_mapping().to_vec(),
            duration_ms,
            details: outcome.details,
            artifacts: outcome.artifacts,
            error_message: outcome.error_message,
        }
    }

}

//! Run report
//!
//! A single JSON document describing one run: summary, delivery outcome and
//! every evidence record in catalog order. Optionally signed with
//! HMAC-SHA256 so the file can be checked for tampering after it leaves the
//! machine that produced it.
//!
//! # Usage
//!
//! ```ignore
//! use gatecheck::evidence::RunReport;
//!
//! let mut report = RunReport::new(&outcome);
//! report.sign(signing_key.expose().as_bytes(), "ci-signing-key")?;
//! report.write_to_file(Path::new("gatecheck-report.json"))?;
//!
//! assert!(report.verify(signing_key.expose().as_bytes())?);
//! ```

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::{DeliveryReport, EvidenceRecord};
use crate::checks::TestStatus;
use crate::orchestrator::{RunOutcome, RunSummary};

type HmacSha256 = Hmac<Sha256>;

/// Report format version
pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";

/// Everything one run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Report format version for forward compatibility
    pub schema_version: String,

    /// Run identifier, also used in idempotency keys
    pub run_id: Uuid,

    /// When the report was generated
    pub generated_at: DateTime<Utc>,

    /// gatecheck version that produced the report
    pub tool_version: String,

    /// Whether records were written locally instead of submitted
    pub dry_run: bool,

    /// Pass/fail/error counts
    pub summary: RunSummary,

    /// Delivery outcome, separate from results
    pub delivery: DeliveryReport,

    /// Evidence records in catalog order
    pub records: Vec<EvidenceRecord>,

    /// Report integrity signature (HMAC-SHA256)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ReportSignature>,
}

/// Signature over the unsigned report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSignature {
    /// Signature algorithm used
    pub algorithm: String,
    /// Key identifier (not the key itself)
    pub key_id: String,
    /// The signature value (base64 encoded)
    pub value: String,
    /// Timestamp of signing
    pub signed_at: DateTime<Utc>,
}

/// Errors that can occur during report signing or verification
#[derive(Debug, Error)]
pub enum SigningError {
    /// Report has not been signed
    #[error("Report is not signed")]
    NotSigned,

    /// The signing key was rejected
    #[error("Invalid signing key")]
    InvalidKey,

    /// The signature is not valid base64
    #[error("Invalid signature format")]
    InvalidSignature,

    /// JSON serialization failed during signing
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RunReport {
    /// Build the report for a finished run
    pub fn new(outcome: &RunOutcome) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: outcome.run_id,
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            dry_run: outcome.delivery.dry_run,
            summary: outcome.summary.clone(),
            delivery: outcome.delivery.clone(),
            records: outcome.records.clone(),
            signature: None,
        }
    }

    /// Export as pretty-printed JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export as minified JSON (for signing)
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Write the report to `path`, replacing any existing file
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Read a report previously written with [`RunReport::write_to_file`]
    pub fn read_from_file(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Records with the given result
    pub fn records_with(&self, status: TestStatus) -> Vec<&EvidenceRecord> {
        self.records.iter().filter(|r| r.result == status).collect()
    }

    fn mac_over_unsigned(&self, key: &[u8]) -> Result<HmacSha256, SigningError> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        let json = unsigned
            .to_json_compact()
            .map_err(|e| SigningError::Serialization(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
        mac.update(json.as_bytes());
        Ok(mac)
    }

    /// Sign the report using HMAC-SHA256.
    ///
    /// The signature covers the compact JSON form of the report with the
    /// signature field removed. `key_id` names the key; the key itself is
    /// never stored.
    pub fn sign(&mut self, key: &[u8], key_id: impl Into<String>) -> Result<(), SigningError> {
        let signature = self.mac_over_unsigned(key)?.finalize().into_bytes();
        self.signature = Some(ReportSignature {
            algorithm: "HMAC-SHA256".to_string(),
            key_id: key_id.into(),
            value: BASE64.encode(signature),
            signed_at: Utc::now(),
        });
        Ok(())
    }

    /// Verify the report's signature with constant-time comparison.
    ///
    /// `Ok(false)` means the report or signature was altered.
    pub fn verify(&self, key: &[u8]) -> Result<bool, SigningError> {
        let sig = self.signature.as_ref().ok_or(SigningError::NotSigned)?;
        let expected = BASE64
            .decode(&sig.value)
            .map_err(|_| SigningError::InvalidSignature)?;
        Ok(self.mac_over_unsigned(key)?.verify_slice(&expected).is_ok())
    }

    /// Check if the report has been signed
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{TestIdentity, TestOutcome};

    fn outcome() -> RunOutcome {
        let records = vec![
            EvidenceRecord::new(
                &TestIdentity::new("RT-004", "Missing API key rejected (401)", &["CC6.1", "CC6.6"]),
                Utc::now(),
                12,
                TestOutcome::assertion(true, Default::default(), Vec::new()),
            ),
            EvidenceRecord::new(
                &TestIdentity::new("CF-003", "All consumers have rate limits configured", &["CC6.2"]),
                Utc::now(),
                30,
                TestOutcome::error("control plane returned HTTP 503"),
            ),
        ];
        let summary = RunSummary::from_records(&records, std::time::Duration::from_millis(42));
        RunOutcome {
            run_id: Uuid::new_v4(),
            summary,
            delivery: DeliveryReport {
                dry_run: true,
                attempted: 2,
                delivered: 2,
                failures: Vec::new(),
            },
            records,
        }
    }

    #[test]
    fn test_report_from_outcome() {
        let report = RunReport::new(&outcome());
        assert_eq!(report.schema_version, REPORT_SCHEMA_VERSION);
        assert!(report.dry_run);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.records_with(TestStatus::Error).len(), 1);
        assert!(!report.is_signed());
    }

    #[test]
    fn test_sign_and_verify_success() {
        let mut report = RunReport::new(&outcome());
        report.sign(b"report-signing-key-for-tests-0001", "test-key").unwrap();

        assert!(report.is_signed());
        assert_eq!(report.signature.as_ref().unwrap().algorithm, "HMAC-SHA256");
        assert!(report.verify(b"report-signing-key-for-tests-0001").unwrap());
    }

    #[test]
    fn test_verify_with_wrong_key_fails() {
        let mut report = RunReport::new(&outcome());
        report.sign(b"report-signing-key-for-tests-0001", "test-key").unwrap();
        assert!(!report.verify(b"some-other-key").unwrap());
    }

    #[test]
    fn test_tampered_report_fails_verification() {
        let mut report = RunReport::new(&outcome());
        report.sign(b"report-signing-key-for-tests-0001", "test-key").unwrap();

        report.records[1].result = TestStatus::Pass;
        assert!(!report.verify(b"report-signing-key-for-tests-0001").unwrap());
    }

    #[test]
    fn test_verify_unsigned_report_fails() {
        let report = RunReport::new(&outcome());
        assert!(matches!(report.verify(b"key"), Err(SigningError::NotSigned)));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = std::env::temp_dir().join(format!("gatecheck-report-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("report.json");

        let mut report = RunReport::new(&outcome());
        report.sign(b"report-signing-key-for-tests-0001", "test-key").unwrap();
        report.write_to_file(&path).unwrap();

        let loaded = RunReport::read_from_file(&path).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.records.len(), 2);
        assert!(loaded.verify(b"report-signing-key-for-tests-0001").unwrap());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

//! Evidence delivery
//!
//! Two strategies behind [`EvidenceSink`], chosen once per run by
//! [`select_sink`]:
//!
//! - [`LiveEvidenceClient`]: one POST per record to the evidence service,
//!   retried with linear backoff. Each request carries an
//!   `Idempotency-Key` of `{run_id}:{test_id}` so redelivery is safe.
//! - [`DryRunSink`]: writes each record as JSON to a local writer. Never
//!   builds an HTTP client.
//!
//! Delivery failures are collected in a [`DeliveryReport`]; they never
//! change a record's result.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::EvidenceRecord;
use crate::config::{Credential, DeliveryMode, DryRunReason, RunConfig};
use crate::error::DeliveryError;
use crate::observability::{audit_event, AuditEvent};

/// Header carrying the per-record idempotency key
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Bounded retry with linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `n * backoff` before retrying
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }

    /// Total attempts including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// One record that did not reach its destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    /// Check id of the record
    pub test_id: String,
    /// Last error observed
    pub error: String,
}

/// Delivery outcome for a whole run, reported separately from results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Records were written locally instead of submitted
    pub dry_run: bool,
    /// Records handed to the sink
    pub attempted: usize,
    /// Records accepted (or written, in dry-run)
    pub delivered: usize,
    /// Records that could not be delivered
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Whether every record was delivered
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.delivered == self.attempted
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(f, "{}/{} records written locally (dry run)", self.delivered, self.attempted)
        } else {
            write!(f, "{}/{} records delivered", self.delivered, self.attempted)
        }
    }
}

/// Destination for evidence records
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    /// Whether this sink performs no network delivery
    fn is_dry_run(&self) -> bool;

    /// Deliver one record
    async fn submit(&self, run_id: Uuid, record: &EvidenceRecord) -> Result<(), DeliveryError>;

    /// Deliver every record in order. Failures are logged and collected;
    /// delivery continues with the next record.
    async fn deliver_all(&self, run_id: Uuid, records: &[EvidenceRecord]) -> DeliveryReport {
        let mut report = DeliveryReport {
            dry_run: self.is_dry_run(),
            attempted: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.submit(run_id, record).await {
                Ok(()) => {
                    report.delivered += 1;
                    if !report.dry_run {
                        audit_event!(
                            AuditEvent::EvidenceDelivered,
                            run_id = %run_id,
                            test_id = %record.test_id,
                            "Evidence delivered"
                        );
                    }
                }
                Err(e) => {
                    audit_event!(
                        AuditEvent::EvidenceDeliveryFailed,
                        run_id = %run_id,
                        test_id = %record.test_id,
                        error = %e,
                        "Evidence delivery failed"
                    );
                    report.failures.push(DeliveryFailure {
                        test_id: record.test_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// Submits records to the evidence service
pub struct LiveEvidenceClient {
    api_base: Url,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl LiveEvidenceClient {
    /// Create a client authenticated with `api_key`
    pub fn new(api_base: Url, api_key: &Credential, timeout: Duration) -> Result<Self, DeliveryError> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.expose()))
            .map_err(|_| DeliveryError::Transport("evidence API key is not a valid header value".to_string()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("gatecheck/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| DeliveryError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base,
            client,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Monitor endpoint a record is submitted to
    pub fn monitor_url(&self, test_id: &str) -> String {
        format!(
            "{}/public/monitors/kong-{}/evidence",
            self.api_base.as_str().trim_end_matches('/'),
            test_id.to_lowercase()
        )
    }

    async fn post_once(&self, url: &str, idempotency_key: &str, body: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: crate::probe::snippet(&body),
        })
    }
}

#[async_trait]
impl EvidenceSink for LiveEvidenceClient {
    fn is_dry_run(&self) -> bool {
        false
    }

    async fn submit(&self, run_id: Uuid, record: &EvidenceRecord) -> Result<(), DeliveryError> {
        let url = self.monitor_url(&record.test_id);
        let idempotency_key = format!("{run_id}:{}", record.test_id);
        let body = serde_json::to_string(record)
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        let mut attempt = 1;
        loop {
            match self.post_once(&url, &idempotency_key, &body).await {
                Ok(()) => {
                    debug!(test_id = %record.test_id, attempt, "Evidence accepted");
                    return Ok(());
                }
                Err(e) if attempt < self.retry.attempts() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        test_id = %record.test_id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Evidence submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writes records to a local writer instead of the evidence service
pub struct DryRunSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl DryRunSink {
    /// Write records to `writer`
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Write records to standard output
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl EvidenceSink for DryRunSink {
    fn is_dry_run(&self) -> bool {
        true
    }

    async fn submit(&self, run_id: Uuid, record: &EvidenceRecord) -> Result<(), DeliveryError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DeliveryError::Output("dry-run writer lock poisoned".to_string()))?;
        writeln!(writer, "{json}")
            .and_then(|()| writer.flush())
            .map_err(|e| DeliveryError::Output(e.to_string()))?;
        debug!(run_id = %run_id, test_id = %record.test_id, "Evidence written locally");
        Ok(())
    }
}

/// Live sink whose client could not be built. Every submission fails with
/// the construction error; results are still produced and reported.
pub struct UndeliverableSink {
    reason: DeliveryError,
}

impl UndeliverableSink {
    /// Wrap the construction failure
    pub fn new(reason: DeliveryError) -> Self {
        Self { reason }
    }
}

#[async_trait]
impl EvidenceSink for UndeliverableSink {
    fn is_dry_run(&self) -> bool {
        false
    }

    async fn submit(&self, _run_id: Uuid, _record: &EvidenceRecord) -> Result<(), DeliveryError> {
        Err(self.reason.clone())
    }
}

/// Pick the delivery strategy for a run.
///
/// Dry-run records go to `dry_run_output`; live delivery needs the evidence
/// credential, which [`RunConfig::delivery_mode`] guarantees is present.
pub fn select_sink(
    config: &RunConfig,
    dry_run_output: impl Write + Send + 'static,
) -> Box<dyn EvidenceSink> {
    match (config.delivery_mode(), config.evidence.api_key.as_ref()) {
        (DeliveryMode::Live, Some(api_key)) => {
            match LiveEvidenceClient::new(config.evidence.api_base.clone(), api_key, config.probe_timeout) {
                Ok(client) => Box::new(client),
                Err(e) => {
                    warn!(error = %e, "Evidence client unavailable, records will not be delivered");
                    Box::new(UndeliverableSink::new(e))
                }
            }
        }
        (mode, _) => {
            if mode == DeliveryMode::DryRun(DryRunReason::MissingCredential) {
                audit_event!(
                    AuditEvent::DryRunForced,
                    reason = "missing evidence credential",
                    "No evidence API key configured, running in dry-run mode"
                );
            }
            Box::new(DryRunSink::new(dry_run_output))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checks::{TestIdentity, TestOutcome};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn record(id: &str) -> EvidenceRecord {
        EvidenceRecord::new(
            &TestIdentity::new(id, "Example", &["CC6.1"]),
            chrono::Utc::now(),
            7,
            TestOutcome::assertion(true, Default::default(), Vec::new()),
        )
    }

    fn config(pairs: &[(&str, &str)]) -> RunConfig {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunConfig::from_lookup(move |k: &str| map.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_retry_policy_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_delivery_report_display() {
        let report = DeliveryReport {
            dry_run: false,
            attempted: 9,
            delivered: 8,
            failures: vec![DeliveryFailure {
                test_id: "CF-003".to_string(),
                error: "transport error: connection refused".to_string(),
            }],
        };
        assert_eq!(report.to_string(), "8/9 records delivered");
        assert!(!report.is_complete());
    }

    #[test]
    fn test_monitor_url() {
        let client = LiveEvidenceClient::new(
            Url::parse("https://evidence.example/").unwrap(),
            &Credential::new("drata-key"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.monitor_url("RT-001"),
            "https://evidence.example/public/monitors/kong-rt-001/evidence"
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_records_in_order() {
        let buffer = SharedBuffer::default();
        let sink = DryRunSink::new(buffer.clone());

        let records = vec![record("RT-001"), record("RT-002")];
        let report = sink.deliver_all(Uuid::new_v4(), &records).await;

        assert!(report.dry_run);
        assert_eq!(report.delivered, 2);
        assert!(report.is_complete());

        let out = buffer.contents();
        let first = out.find("\"RT-001\"").unwrap();
        let second = out.find("\"RT-002\"").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_failure() {
        // Port 9 on localhost is not expected to accept HTTP.
        let client = LiveEvidenceClient::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            &Credential::new("drata-key"),
            Duration::from_millis(200),
        )
        .unwrap()
        .with_retry(RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(1),
        });

        let report = client.deliver_all(Uuid::new_v4(), &[record("RT-003")]).await;

        assert!(!report.dry_run);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].test_id, "RT-003");
    }

    #[tokio::test]
    async fn test_undeliverable_sink_keeps_going() {
        let sink = UndeliverableSink::new(DeliveryError::Transport("no TLS backend".to_string()));
        let records = vec![record("RT-001"), record("RT-002")];

        let report = sink.deliver_all(Uuid::new_v4(), &records).await;

        assert!(!report.dry_run);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[1].error.contains("no TLS backend"));
    }

    #[test]
    fn test_missing_key_selects_dry_run() {
        let cfg = config(&[("KONNECT_TOKEN", "t"), ("DATAPLANE_URL", "http://localhost:8000")]);
        let sink = select_sink(&cfg, std::io::sink());
        assert!(sink.is_dry_run());
    }

    #[test]
    fn test_requested_dry_run_wins_over_key() {
        let cfg = config(&[
            ("KONNECT_TOKEN", "t"),
            ("DATAPLANE_URL", "http://localhost:8000"),
            ("DRATA_API_KEY", "k"),
            ("DRY_RUN", "true"),
        ]);
        assert!(select_sink(&cfg, std::io::sink()).is_dry_run());
    }

    #[test]
    fn test_key_selects_live() {
        let cfg = config(&[
            ("KONNECT_TOKEN", "t"),
            ("DATAPLANE_URL", "http://localhost:8000"),
            ("DRATA_API_KEY", "k"),
        ]);
        assert!(!select_sink(&cfg, std::io::sink()).is_dry_run());
    }
}

//! Orchestrator
//!
//! Runs the catalog once, end to end. Checks execute strictly one after
//! another: the gateway's rate-limit counters are shared between checks of
//! the same tier, so interleaving would make counts meaningless.
//!
//! Every catalog entry executes exactly once. A check that fails, errors or
//! panics is recorded and the run moves on. Each check runs on its own
//! spawned task that is awaited immediately, which contains panics without
//! introducing concurrency.
//!
//! After the last check the records are handed to the evidence sink in
//! catalog order.

use std::any::Any;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::catalog;
use crate::checks::{ProbeContext, TestCase, TestOutcome, TestStatus, WindowPolicy};
use crate::config::RunConfig;
use crate::evidence::{select_sink, DeliveryReport, EvidenceRecord, EvidenceSink};
use crate::observability::{audit_event, AuditEvent};
use crate::probe::{ControlPlane, DataPlane, HttpDataPlane, KonnectClient, UnavailableProbe};

/// Process exit code when no check errored
pub const EXIT_OK: u8 = 0;

/// Process exit code when at least one check errored
pub const EXIT_CHECK_ERROR: u8 = 1;

/// Process exit code for configuration errors; no check ran
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Aggregate over one pass of the catalog.
///
/// Invariant: `total == passed + failed + errored`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Checks executed
    pub total: usize,
    /// PASS count
    pub passed: usize,
    /// FAIL count
    pub failed: usize,
    /// ERROR count
    pub errored: usize,
    /// Wall-clock time for the whole pass
    pub duration_ms: u64,
}

impl RunSummary {
    /// Count one completed check
    pub fn record(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Error => self.errored += 1,
        }
    }

    /// Summarise a finished sequence of records
    pub fn from_records(records: &[EvidenceRecord], duration: Duration) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.record(record.result);
        }
        summary.duration_ms = duration.as_millis() as u64;
        summary
    }

    /// Whether any check errored
    pub fn has_errors(&self) -> bool {
        self.errored > 0
    }

    /// FAIL alone does not fail the process; it is a recorded finding
    pub fn exit_code(&self) -> u8 {
        if self.has_errors() {
            EXIT_CHECK_ERROR
        } else {
            EXIT_OK
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Run identifier
    pub run_id: Uuid,
    /// Result counts
    pub summary: RunSummary,
    /// Delivery counts, separate from results
    pub delivery: DeliveryReport,
    /// Records in catalog order
    pub records: Vec<EvidenceRecord>,
}

impl RunOutcome {
    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        self.summary.exit_code()
    }
}

/// Owns the catalog, the probe handles and the evidence sink for one run
pub struct Orchestrator {
    catalog: Vec<TestCase>,
    context: ProbeContext,
    sink: Box<dyn EvidenceSink>,
}

impl Orchestrator {
    /// Assemble an orchestrator from parts
    pub fn new(catalog: Vec<TestCase>, context: ProbeContext, sink: Box<dyn EvidenceSink>) -> Self {
        Self {
            catalog,
            context,
            sink,
        }
    }

    /// Build the production wiring: Konnect control plane, HTTP data plane,
    /// the fixed catalog and the sink chosen by the delivery mode.
    ///
    /// A client that cannot be built does not stop the run: its checks record
    /// ERROR and undeliverable evidence shows up in the delivery report.
    pub fn from_config(config: &RunConfig, dry_run_output: impl Write + Send + 'static) -> Self {
        let control_plane: Arc<dyn ControlPlane> =
            match KonnectClient::from_credentials(&config.gateway, config.probe_timeout) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!(error = %e, "Control-plane client unavailable");
                    Arc::new(UnavailableProbe::new(&e))
                }
            };
        let data_plane: Arc<dyn DataPlane> =
            match HttpDataPlane::new(config.gateway.dataplane_url.clone(), config.probe_timeout) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!(error = %e, "Data-plane client unavailable");
                    Arc::new(UnavailableProbe::new(&e))
                }
            };
        let window = WindowPolicy {
            wait_for_rollover: config.wait_for_window,
            ..WindowPolicy::default()
        };
        let context = ProbeContext::new(control_plane, data_plane, window);

        Self::new(
            catalog(&config.gateway),
            context,
            select_sink(config, dry_run_output),
        )
    }

    /// Checks this orchestrator will run, in order
    pub fn catalog(&self) -> &[TestCase] {
        &self.catalog
    }

    /// Run every check once, then deliver the evidence
    pub async fn run(&self) -> RunOutcome {
        let run_id = Uuid::new_v4();
        audit_event!(
            AuditEvent::RunStarted,
            run_id = %run_id,
            checks = self.catalog.len(),
            dry_run = self.sink.is_dry_run(),
            "Compliance run started"
        );

        let started = Instant::now();
        let mut records = Vec::with_capacity(self.catalog.len());

        for case in &self.catalog {
            let record = self.execute_one(case).await;
            log_outcome(&record);
            records.push(record);
        }
        let summary = RunSummary::from_records(&records, started.elapsed());

        let delivery = self.sink.deliver_all(run_id, &records).await;

        audit_event!(
            AuditEvent::RunCompleted,
            run_id = %run_id,
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            duration_ms = summary.duration_ms,
            delivered = delivery.delivered,
            delivery_failures = delivery.failures.len(),
            "Compliance run completed"
        );

        RunOutcome {
            run_id,
            summary,
            delivery,
            records,
        }
    }

    async fn execute_one(&self, case: &TestCase) -> EvidenceRecord {
        let identity = case.identity();
        let started_at = Utc::now();
        let clock = Instant::now();

        let span = info_span!("check", test_id = %identity.id(), kind = case.kind());
        let task_case = case.clone();
        let ctx = self.context.clone();
        let joined = tokio::spawn(async move { task_case.execute(&ctx).await }.instrument(span)).await;

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => TestOutcome::error(e.to_string()),
            Err(e) if e.is_panic() => {
                TestOutcome::error(format!("check panicked: {}", panic_message(e.into_panic())))
            }
            Err(e) => TestOutcome::error(format!("check task did not complete: {e}")),
        };

        EvidenceRecord::new(identity, started_at, clock.elapsed().as_millis() as u64, outcome)
    }
}

fn log_outcome(record: &EvidenceRecord) {
    match record.result {
        TestStatus::Pass => audit_event!(
            AuditEvent::CheckPassed,
            test_id = %record.test_id,
            duration_ms = record.duration_ms,
            "Check passed"
        ),
        TestStatus::Fail => audit_event!(
            AuditEvent::CheckFailed,
            test_id = %record.test_id,
            duration_ms = record.duration_ms,
            "Check failed"
        ),
        TestStatus::Error => audit_event!(
            AuditEvent::CheckErrored,
            test_id = %record.test_id,
            duration_ms = record.duration_ms,
            error = record.error_message.as_deref().unwrap_or("unknown"),
            "Check errored"
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

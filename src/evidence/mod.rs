//! Evidence
//!
//! Records, supporting artifacts, the signed run report, and the two
//! delivery strategies (live submission and dry-run output).

mod record;
mod report;
mod sink;

pub use record::{ArtifactCollector, ArtifactKind, EvidenceArtifact, EvidenceRecord};
pub use report::{ReportSignature, RunReport, SigningError, REPORT_SCHEMA_VERSION};
pub use sink::{
    select_sink, DeliveryFailure, DeliveryReport, DryRunSink, EvidenceSink, LiveEvidenceClient,
    RetryPolicy, UndeliverableSink, IDEMPOTENCY_HEADER,
};

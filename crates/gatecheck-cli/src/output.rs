//! Output formatting and display utilities
//!
//! Provides colored, formatted output for the CLI.
//!
//! Human-readable lines normally go to stdout. When dry-run evidence is
//! written to stdout they move to stderr so the records stay parseable.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::{ColoredString, Colorize};
use gatecheck::{EvidenceRecord, RunOutcome, TestCase, TestStatus};

static HUMAN_ON_STDERR: AtomicBool = AtomicBool::new(false);

macro_rules! say {
    ($($arg:tt)*) => {
        emit(format_args!($($arg)*))
    };
}

/// Send human-readable output to stderr for the rest of the process
pub fn reserve_stdout_for_records() {
    HUMAN_ON_STDERR.store(true, Ordering::Relaxed);
}

fn human_on_stderr() -> bool {
    HUMAN_ON_STDERR.load(Ordering::Relaxed)
}

fn emit(args: fmt::Arguments<'_>) {
    if human_on_stderr() {
        eprintln!("{args}");
    } else {
        println!("{args}");
    }
}

const NAME_WIDTH: usize = 40;
const CONTROLS_SHOWN: usize = 3;

/// Print a success message
pub fn success(msg: &str) {
    say!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    say!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    say!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    say!("\n{}", msg.bold().underline());
}

/// Print the CLI banner
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    say!("{}", format!("gatecheck v{}", version).bold());
    say!("{}", "Gateway authentication and rate-limit compliance checks".dimmed());
}

/// Truncate to `width` characters, marking the cut with an ellipsis
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let kept: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// First few control tags, with a marker when some were left out
pub fn controls_column(controls: &[String]) -> String {
    let shown = controls
        .iter()
        .take(CONTROLS_SHOWN)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");
    if controls.len() > CONTROLS_SHOWN {
        format!("{shown},+{}", controls.len() - CONTROLS_SHOWN)
    } else {
        shown
    }
}

fn colored_status(status: TestStatus) -> ColoredString {
    let label = format!("{:<5}", status.as_str());
    match status {
        TestStatus::Pass => label.green().bold(),
        TestStatus::Fail => label.red().bold(),
        TestStatus::Error => label.yellow().bold(),
    }
}

fn print_row(record: &EvidenceRecord, verbose: bool) {
    say!(
        "  {:<8} {:<width$}  {}  {:>7}  {}",
        record.test_id,
        truncate(&record.test_name, NAME_WIDTH),
        colored_status(record.result),
        format!("{}ms", record.duration_ms),
        controls_column(&record.control_mapping).dimmed(),
        width = NAME_WIDTH,
    );
    if record.result == TestStatus::Error {
        let message = record.error_message.as_deref().unwrap_or("unknown error");
        if verbose {
            say!("           {}", message.yellow());
        } else {
            say!("           {}", truncate(message, 72).yellow());
        }
    }
}

/// Print the results table, totals and delivery line
pub fn print_run(outcome: &RunOutcome, verbose: bool) {
    header(&format!("Compliance run {}", outcome.run_id));
    say!(
        "  {:<8} {:<width$}  {:<5}  {:>7}  {}",
        "ID".bold(),
        "Name".bold(),
        "Result".bold(),
        "Time".bold(),
        "Controls".bold(),
        width = NAME_WIDTH,
    );
    for record in &outcome.records {
        print_row(record, verbose);
    }

    let summary = &outcome.summary;
    say!("");
    say!(
        "  {} total, {} passed, {} failed, {} errored in {:.1}s",
        summary.total,
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.errored.to_string().yellow(),
        summary.duration_ms as f64 / 1000.0,
    );

    let delivery = &outcome.delivery;
    if delivery.dry_run {
        info(&format!("Evidence: {delivery}"));
    } else if delivery.is_complete() {
        success(&format!("Evidence: {delivery}"));
    } else {
        warning(&format!("Evidence: {delivery}"));
        for failure in &delivery.failures {
            say!("    {} {}: {}", "✗".red(), failure.test_id, failure.error.dimmed());
        }
    }
    say!("");
}

/// Print the catalog without running it
pub fn print_catalog(cases: &[TestCase]) {
    header("Checks");
    for case in cases {
        let identity = case.identity();
        let kind = if case.generates_traffic() {
            "runtime".cyan()
        } else {
            "config".magenta()
        };
        say!(
            "  {:<8} {:<width$}  {:<8} {}",
            identity.id(),
            truncate(identity.name(), NAME_WIDTH),
            kind,
            identity.control_mapping().join(",").dimmed(),
            width = NAME_WIDTH,
        );
    }
    say!("");
}

/// Print a JSON document
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 40), "short");
        let long = "Rate limiting enforces a very long tier name (5 req/min)";
        let cut = truncate(long, 40);
        assert_eq!(cut.chars().count(), 40);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_reserving_stdout_redirects_human_output() {
        assert!(!human_on_stderr());
        reserve_stdout_for_records();
        assert!(human_on_stderr());
        info("goes to stderr");
    }

    #[test]
    fn test_controls_column() {
        let controls: Vec<String> = ["CC6.1", "CC6.3", "CC7.2", "CC8.1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(controls_column(&controls), "CC6.1,CC6.3,CC7.2,+1");
        assert_eq!(controls_column(&controls[..2]), "CC6.1,CC6.3");
    }
}

//! gatecheck CLI - runs the compliance catalog against a gateway
//!
//! Loads configuration from the environment, runs every check once,
//! delivers evidence (or prints it in dry-run mode), prints a summary table
//! and exits with a status reflecting whether any check errored.
//!
//! Exit codes: 0 no check errored, 1 at least one check errored (or the
//! report could not be written), 2 configuration error.
//!
//! In dry-run mode standard output carries only the evidence records; the
//! banner and summary table go to standard error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gatecheck::evidence::RunReport;
use gatecheck::observability::{self, audit_event, AuditEvent, LogFormat, ObservabilityConfig};
use gatecheck::{
    catalog, parse_bool, Credential, Orchestrator, RunConfig, RunOutcome, TestStatus, EXIT_OK,
};

mod error;
mod output;

use error::{CliError, Result};

/// gatecheck - gateway authentication and rate-limit compliance checks
#[derive(Parser)]
#[command(name = "gatecheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Write records locally instead of submitting them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write the run report (JSON, signed when EVIDENCE_SIGNING_KEY is set)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Log format: pretty, json, compact
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Do not wait for a fresh rate-limit window before traffic checks
    #[arg(long, global = true)]
    no_window_wait: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Run every check and deliver evidence (default)
    Run,

    /// List the checks without running them
    Catalog {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the signature of a run report
    Verify {
        /// Report written with --output
        report: PathBuf,
    },
}

fn parse_log_format(s: &str) -> std::result::Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format '{s}' (pretty, json, compact)"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        output::error(&e.to_string());
        return ExitCode::from(e.exit_code());
    }

    let result = match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&cli).await,
        Commands::Catalog { json } => cmd_catalog(json),
        Commands::Verify { report } => cmd_verify(&report),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output::error(&e.to_string());
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let verbose_env = std::env::var("VERBOSE")
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(false);

    let mut config = ObservabilityConfig::from_env().verbose(cli.verbose || verbose_env);
    if let Some(format) = cli.log_format {
        config = config.log_format(format);
    }
    observability::init(&config)?;
    Ok(())
}

/// Load configuration from the environment and overlay command-line flags
fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = RunConfig::from_env().map_err(|e| {
        audit_event!(
            AuditEvent::ConfigurationRejected,
            error = %e,
            "Configuration rejected, no checks will run"
        );
        e
    })?;

    config.dry_run_requested |= cli.dry_run;
    config.verbose |= cli.verbose;
    if cli.no_window_wait {
        config.wait_for_window = false;
    }
    Ok(config)
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn cmd_run(cli: &Cli) -> Result<u8> {
    let config = load_config(cli)?;

    if config.delivery_mode().is_dry_run() {
        output::reserve_stdout_for_records();
    }
    output::print_banner();
    if config.delivery_mode().is_dry_run() {
        output::info("Dry run: evidence records are written to standard output");
    }
    if config.wait_for_window {
        output::info("Traffic checks wait for a fresh rate-limit window (up to a minute each)");
    }

    let orchestrator = Orchestrator::from_config(&config, std::io::stdout());
    let outcome = orchestrator.run().await;

    output::print_run(&outcome, config.verbose);

    if let Some(ref path) = cli.output {
        write_report(&outcome, config.evidence.signing_key.as_ref(), path)?;
        output::success(&format!("Report written to {}", path.display()));
    }

    Ok(outcome.exit_code())
}

fn write_report(outcome: &RunOutcome, signing_key: Option<&Credential>, path: &Path) -> Result<()> {
    let mut report = RunReport::new(outcome);
    if let Some(key) = signing_key {
        report.sign(key.expose().as_bytes(), key.fingerprint())?;
    } else {
        output::warning("EVIDENCE_SIGNING_KEY not set, report is unsigned");
    }
    report
        .write_to_file(path)
        .map_err(|source| CliError::ReportWrite {
            path: path.to_path_buf(),
            source,
        })
}

fn cmd_catalog(json: bool) -> Result<u8> {
    let config = RunConfig::from_env()?;
    let cases = catalog(&config.gateway);

    if json {
        let listing: Vec<_> = cases
            .iter()
            .map(|case| {
                let identity = case.identity();
                serde_json::json!({
                    "test_id": identity.id(),
                    "test_name": identity.name(),
                    "kind": case.kind(),
                    "control_mapping": identity.control_mapping(),
                })
            })
            .collect();
        output::print_json(&listing)?;
    } else {
        output::print_catalog(&cases);
    }
    Ok(EXIT_OK)
}

fn cmd_verify(path: &Path) -> Result<u8> {
    let key = std::env::var("EVIDENCE_SIGNING_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .map(Credential::new)
        .ok_or_else(|| CliError::invalid("EVIDENCE_SIGNING_KEY", "required to verify a report"))?;

    let report = RunReport::read_from_file(path).map_err(|source| CliError::ReportRead {
        path: path.to_path_buf(),
        source,
    })?;

    if !report.verify(key.expose().as_bytes())? {
        return Err(CliError::SignatureMismatch {
            path: path.to_path_buf(),
        });
    }

    output::success(&format!(
        "Report {} verified: run {}, {} records, {} errored",
        path.display(),
        report.run_id,
        report.records.len(),
        report.summary.errored,
    ));
    for record in report.records_with(TestStatus::Error) {
        output::warning(&format!(
            "{} errored: {}",
            record.test_id,
            record.error_message.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(EXIT_OK)
}

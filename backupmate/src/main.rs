//! Backupmate - command line entry point
//!
//! Exit codes: 0 on success, 1 for invalid arguments or configuration,
//! 2 for failures during the run.

use anyhow::Context;
use backupmate::config::{BackupMode, CorruptStatePolicy, RunConfig, Settings};
use backupmate::daemon::shutdown::ShutdownCoordinator;
use backupmate::executor::plan::Action;
use backupmate::executor::BackupExecutor;
use backupmate::report::{FailureStage, RunReport};
use backupmate::utils;
use backupmate::utils::errors::{EXIT_INVALID_ARGS, EXIT_RUNTIME_ERROR};
use clap::error::ErrorKind;
use clap::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Content-aware incremental backups", long_about = None)]
struct Args {
    /// Source directory
    source_dir: PathBuf,

    /// Destination directory
    dest_dir: PathBuf,

    /// Backup mode (default: incremental)
    #[arg(long, value_enum)]
    mode: Option<BackupMode>,

    /// Glob pattern to exclude (can be repeated)
    #[arg(long = "exclude", value_name = "GLOB")]
    excludes: Vec<String>,

    /// Path to state file (default: .backupmate_state.json under destination)
    #[arg(long, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Show actions without copying files or writing state
    #[arg(long)]
    dry_run: bool,

    /// Write JSON summary to the given path
    #[arg(long, value_name = "FILE")]
    json_report: Option<PathBuf>,

    /// Path to settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of files hashed and copied concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Start from empty state instead of aborting when the state file is corrupt
    #[arg(long)]
    treat_corrupt_state_as_empty: bool,

    /// Abort the run on the first file that cannot be copied
    #[arg(long)]
    abort_on_copy_error: bool,

    /// Exit with status 2 when any file could not be read or copied
    #[arg(long)]
    fail_on_file_errors: bool,
}

impl Args {
    /// Merge command line flags over settings into the run configuration.
    fn run_config(&self, settings: &Settings) -> RunConfig {
        let mut config = RunConfig::from_settings(&self.source_dir, &self.dest_dir, settings)
            .with_excludes(self.excludes.iter().cloned())
            .with_dry_run(self.dry_run);

        if let Some(mode) = self.mode {
            config = config.with_mode(mode);
        }
        if let Some(state_file) = &self.state_file {
            config = config.with_state_file(state_file);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.treat_corrupt_state_as_empty {
            config.on_corrupt_state = CorruptStatePolicy::TreatAsEmpty;
        }
        config.abort_on_copy_error |= self.abort_on_copy_error;
        config.fail_on_file_errors |= self.fail_on_file_errors;
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_INVALID_ARGS,
            };
            let _ = e.print();
            return ExitCode::from(code as u8);
        }
    };

    ExitCode::from(run(args).await as u8)
}

async fn run(args: Args) -> i32 {
    // Load settings
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            return e.exit_code();
        }
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&settings.log.level);
    if let Err(e) = utils::logger::init(log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }

    tracing::info!("Starting backupmate v{}", env!("CARGO_PKG_VERSION"));

    let config = args.run_config(&settings);
    let start_time = Instant::now();

    let (cancel_token, listener) = ShutdownCoordinator::new().spawn_listener();
    let executor = BackupExecutor::local(&config).with_cancel(cancel_token);
    let result = executor.execute(&config).await;
    listener.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {e}");
            let mut exit_code = e.exit_code();
            if exit_code == EXIT_RUNTIME_ERROR {
                if let Some(path) = &args.json_report {
                    let mut report = RunReport::not_started(config.mode, config.dry_run);
                    report.finish(start_time.elapsed(), false);
                    exit_code = write_report(&report, path, exit_code);
                }
            }
            return exit_code;
        }
    };

    let prefix = if config.dry_run { "DRY-RUN " } else { "" };
    let failed: HashSet<&str> = outcome
        .report
        .failures
        .iter()
        .map(|f| f.relative_path.as_str())
        .collect();
    for decision in &outcome.report.decisions {
        if decision.action == Action::Copy && !failed.contains(decision.relative_path.as_str()) {
            println!("{prefix}COPY {}", decision.relative_path);
        }
    }
    for failure in &outcome.report.failures {
        eprintln!(
            "Failed to {} {}: {}",
            match failure.stage {
                FailureStage::Read => "read",
                FailureStage::Copy => "copy",
            },
            failure.relative_path,
            failure.message
        );
    }
    println!("{}", outcome.report.summary_line());

    if let Some(e) = &outcome.failure {
        eprintln!("Error: {e}");
    }

    let mut exit_code = outcome.exit_code(config.fail_on_file_errors);

    if let Some(path) = &args.json_report {
        exit_code = write_report(&outcome.report, path, exit_code);
    }

    exit_code
}

/// Write the JSON report, turning a write failure into a runtime error.
fn write_report(report: &RunReport, path: &Path, exit_code: i32) -> i32 {
    let written = report
        .write_json(path)
        .with_context(|| format!("writing {}", path.display()));
    match written {
        Ok(()) => exit_code,
        Err(e) => {
            eprintln!("Failed to write JSON report: {e:#}");
            EXIT_RUNTIME_ERROR
        }
    }
}

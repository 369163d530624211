//! Backup executor - orchestrates one backup run.
//!
//! The pipeline is:
//! - load the previous state for the destination
//! - walk the source tree on a blocking thread, streaming candidates
//! - hash, classify and copy candidates on a bounded pool of blocking tasks
//! - join every task, then build the report and the new snapshot in walk order
//! - commit the new snapshot unless the run is a dry run or was aborted

pub mod plan;

use crate::config::RunConfig;
use crate::fs::{Candidate, FileCopier, LocalCopier, TreeWalker};
use crate::hash::{ContentHasher, Sha256Hasher};
use crate::report::{FailureStage, RunReport};
use crate::state::{StateSnapshot, StateStore};
use crate::utils::errors::{BackupError, Result, EXIT_RUNTIME_ERROR};
use plan::{Action, BackupDecision, DecisionReason, DiffPlanner, PlannedFile};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Candidates buffered between the walker thread and the scheduler.
const WALK_CHANNEL_CAPACITY: usize = 256;

/// Result of a run that got far enough to produce a report.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Snapshot describing the tree as seen by this run. Only persisted when
    /// `failure` is `None` and the run was not a dry run.
    pub snapshot: StateSnapshot,
    /// Whole-run failure that happened after the run started.
    pub failure: Option<BackupError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self, fail_on_file_errors: bool) -> i32 {
        match &self.failure {
            Some(e) => e.exit_code(),
            None if fail_on_file_errors && self.report.has_file_errors() => EXIT_RUNTIME_ERROR,
            None => 0,
        }
    }
}

/// What happened to one file.
#[derive(Debug)]
enum FileOutcome {
    Skipped,
    ReadFailed(String),
    Copied(u64),
    WouldCopy(u64),
    CopyFailed(io::Error),
}

#[derive(Debug)]
struct ProcessedFile {
    planned: PlannedFile,
    outcome: FileOutcome,
}

/// Main backup executor
pub struct BackupExecutor {
    hasher: Arc<dyn ContentHasher>,
    copier: Arc<dyn FileCopier>,
    cancel_token: CancellationToken,
}

impl BackupExecutor {
    /// Create an executor with explicit hashing and copying backends
    pub fn new(hasher: Arc<dyn ContentHasher>, copier: Arc<dyn FileCopier>) -> Self {
        Self {
            hasher,
            copier,
            cancel_token: CancellationToken::new(),
        }
    }

    /// SHA-256 hashing and local filesystem copies, tuned by `config`
    pub fn local(config: &RunConfig) -> Self {
        Self::new(
            Arc::new(Sha256Hasher::new(config.hash_chunk_size)),
            Arc::new(LocalCopier),
        )
    }

    /// Use `cancel_token` to interrupt the run
    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Execute a backup run.
    ///
    /// Returns `Err` only when the run never started (invalid configuration,
    /// unreadable or corrupt state). Failures after that point are reported
    /// in `RunOutcome::failure` together with the partial report.
    pub async fn execute(&self, config: &RunConfig) -> Result<RunOutcome> {
        let start_time = Instant::now();

        let excludes = config.validate()?;
        let source_root = config.source_dir.canonicalize().map_err(|e| {
            BackupError::Config(format!(
                "Cannot resolve source directory {}: {}",
                config.source_dir.display(),
                e
            ))
        })?;
        let store = StateStore::new(&config.state_file, config.dry_run);
        let loaded = store.load_with_policy(config.on_corrupt_state)?;

        let mut previous = loaded.snapshot;
        if previous.hash_algorithm != self.hasher.algorithm() {
            warn!(
                "State was recorded with {} but this run uses {}; treating every file as new",
                previous.hash_algorithm,
                self.hasher.algorithm()
            );
            previous = StateSnapshot::new(self.hasher.algorithm());
        }

        if !config.dry_run {
            std::fs::create_dir_all(&config.dest_dir)?;
        }
        let dest_root = resolve_path(&config.dest_dir);
        let state_path = resolve_path(&config.state_file);

        info!(
            "Starting {} backup{}: {} -> {} ({} previous entries, {} workers)",
            config.mode,
            if config.dry_run { " (dry run)" } else { "" },
            source_root.display(),
            dest_root.display(),
            previous.len(),
            config.workers
        );

        let mut report = RunReport::new(config.mode, config.dry_run, loaded.origin);
        let planner = DiffPlanner::new(Arc::new(previous), config.mode, Arc::clone(&self.hasher));

        let mut walker = TreeWalker::new(&source_root, excludes);
        for inner in [&dest_root, &state_path] {
            if inner.starts_with(&source_root) && inner != &source_root {
                walker = walker.skip_path(inner.clone());
            }
        }

        // Child token: aborting on a copy error must not look like an interrupt.
        let run_token = self.cancel_token.child_token();

        let (tx, mut rx) = mpsc::channel::<Candidate>(WALK_CHANNEL_CAPACITY);
        let walk_token = run_token.clone();
        let walk_handle = tokio::task::spawn_blocking(move || {
            for candidate in walker.walk() {
                if walk_token.is_cancelled() || tx.blocking_send(candidate).is_err() {
                    break;
                }
            }
        });

        let semaphore = Arc::new(Semaphore::new(config.workers));
        let mut handles = Vec::new();

        loop {
            let candidate = tokio::select! {
                biased;
                _ = run_token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(candidate) => candidate,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = run_token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let relative_path = candidate.relative_path().to_string();
            let planner = planner.clone();
            let copier = Arc::clone(&self.copier);
            let dest_root = dest_root.clone();
            let dry_run = config.dry_run;
            let abort_on_copy_error = config.abort_on_copy_error;
            let task_token = run_token.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let processed =
                    process_file(&planner, copier.as_ref(), &dest_root, dry_run, candidate);
                if abort_on_copy_error && matches!(processed.outcome, FileOutcome::CopyFailed(_)) {
                    task_token.cancel();
                }
                processed
            });
            handles.push((relative_path, handle));
        }

        // Unblocks the walker if we stopped early.
        drop(rx);

        // Barrier: every file finishes before anything is aggregated or committed.
        let mut new_snapshot = StateSnapshot::new(self.hasher.algorithm());
        let mut copy_abort = None;

        for (relative_path, handle) in handles {
            let processed = match handle.await {
                Ok(processed) => processed,
                Err(e) => {
                    error!("Task for {} failed: {}", relative_path, e);
                    report.record_failure(
                        BackupDecision {
                            relative_path,
                            action: Action::Skip,
                            reason: DecisionReason::Error("task-failed"),
                            size_bytes: 0,
                        },
                        FailureStage::Read,
                        e.to_string(),
                    );
                    continue;
                }
            };

            let ProcessedFile { planned, outcome } = processed;
            match outcome {
                FileOutcome::Skipped => {
                    if let Some(entry) = planned.fingerprint {
                        new_snapshot.insert(entry);
                    }
                    report.record(planned.decision, 0);
                }
                FileOutcome::Copied(bytes) | FileOutcome::WouldCopy(bytes) => {
                    if let Some(entry) = planned.fingerprint {
                        new_snapshot.insert(entry);
                    }
                    report.record(planned.decision, bytes);
                }
                FileOutcome::ReadFailed(message) => {
                    report.record_failure(planned.decision, FailureStage::Read, message);
                }
                FileOutcome::CopyFailed(e) => {
                    let message = e.to_string();
                    if config.abort_on_copy_error && copy_abort.is_none() {
                        copy_abort = Some(BackupError::CopyAborted {
                            path: planned.decision.relative_path.clone(),
                            source: e,
                        });
                    }
                    report.record_failure(planned.decision, FailureStage::Copy, message);
                }
            }
        }

        if let Err(e) = walk_handle.await {
            error!("Tree walker task failed: {}", e);
        }

        let mut failure = if self.cancel_token.is_cancelled() {
            warn!("Backup interrupted, state not committed");
            Some(BackupError::Interrupted)
        } else {
            copy_abort
        };

        if failure.is_none() {
            if let Err(e) = store.commit(&new_snapshot) {
                error!("{}", e);
                failure = Some(e);
            }
        }

        report.finish(start_time.elapsed(), failure.is_none());

        info!(
            "Backup {}: {} copied ({} bytes), {} skipped, {} failed in {:.2}s",
            if failure.is_none() { "completed" } else { "aborted" },
            report.files_copied,
            report.bytes_copied,
            report.files_skipped,
            report.files_failed,
            report.duration.as_secs_f64()
        );

        Ok(RunOutcome {
            report,
            snapshot: new_snapshot,
            failure,
        })
    }
}

/// Plan one candidate and apply its decision.
fn process_file(
    planner: &DiffPlanner,
    copier: &dyn FileCopier,
    dest_root: &Path,
    dry_run: bool,
    candidate: Candidate,
) -> ProcessedFile {
    let planned = planner.plan(candidate);

    let outcome = match (&planned.error, planned.decision.action, &planned.source) {
        (Some(message), _, _) => FileOutcome::ReadFailed(message.clone()),
        (None, Action::Copy, Some(source)) => {
            let relative_path = &planned.decision.relative_path;
            if dry_run {
                debug!("DRY-RUN COPY {}", relative_path);
                FileOutcome::WouldCopy(planned.decision.size_bytes)
            } else {
                let dest = destination_path(dest_root, relative_path);
                match copier.copy_file(source, &dest) {
                    Ok(bytes) => {
                        debug!("COPY {} ({} bytes)", relative_path, bytes);
                        FileOutcome::Copied(bytes)
                    }
                    Err(e) => {
                        warn!("Failed to copy {}: {}", relative_path, e);
                        FileOutcome::CopyFailed(e)
                    }
                }
            }
        }
        _ => FileOutcome::Skipped,
    };

    ProcessedFile { planned, outcome }
}

/// Mirror a `/`-separated relative path below `dest_root`.
fn destination_path(dest_root: &Path, relative_path: &str) -> PathBuf {
    relative_path
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(dest_root.to_path_buf(), |path, part| path.join(part))
}

/// Canonical absolute form of `path`.
///
/// Components that do not exist yet are appended to the canonical form of
/// the deepest existing ancestor, so the result can be compared with the
/// canonical source root before the directories are created.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(resolved) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(resolved, |resolved, name| resolved.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

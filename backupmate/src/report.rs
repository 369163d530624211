//! Run reports.
//!
//! A `RunReport` aggregates the per-file decisions of one run. It is built by
//! the executor, rendered by the CLI, and never persisted by the engine.

use crate::config::BackupMode;
use crate::executor::plan::{Action, BackupDecision};
use crate::state::StateOrigin;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fs;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Stage at which a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Read,
    Copy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub relative_path: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Aggregate result of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: BackupMode,
    pub dry_run: bool,
    /// False when the run was aborted before the state was committed.
    pub completed: bool,
    /// `None` when the run stopped before a previous state was available.
    pub state_origin: Option<StateOrigin>,

    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_skipped: u64,
    pub files_failed: u64,

    #[serde(rename = "duration_seconds", serialize_with = "serialize_secs")]
    pub duration: Duration,

    pub decisions: Vec<BackupDecision>,
    pub failures: Vec<FileFailure>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl RunReport {
    pub fn new(mode: BackupMode, dry_run: bool, state_origin: StateOrigin) -> Self {
        Self {
            state_origin: Some(state_origin),
            ..Self::not_started(mode, dry_run)
        }
    }

    /// Report for a run that aborted before any file was processed.
    pub fn not_started(mode: BackupMode, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
            dry_run,
            completed: false,
            state_origin: None,
            files_copied: 0,
            bytes_copied: 0,
            files_skipped: 0,
            files_failed: 0,
            duration: Duration::ZERO,
            decisions: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Record a decision whose outcome succeeded. For copies, `bytes` is
    /// the number of bytes written (or that would be written in a dry run).
    pub fn record(&mut self, decision: BackupDecision, bytes: u64) {
        match decision.action {
            Action::Copy => {
                self.files_copied += 1;
                self.bytes_copied += bytes;
            }
            Action::Skip => self.files_skipped += 1,
        }
        self.decisions.push(decision);
    }

    /// Record a decision whose file failed at `stage`.
    ///
    /// Read failures are skip decisions and count as skipped; copy failures
    /// count as neither copied nor skipped.
    pub fn record_failure(&mut self, decision: BackupDecision, stage: FailureStage, message: String) {
        if decision.action == Action::Skip {
            self.files_skipped += 1;
        }
        self.files_failed += 1;
        self.failures.push(FileFailure {
            relative_path: decision.relative_path.clone(),
            stage,
            message,
        });
        self.decisions.push(decision);
    }

    pub fn finish(&mut self, duration: Duration, completed: bool) {
        self.duration = duration;
        self.completed = completed;
    }

    pub fn has_file_errors(&self) -> bool {
        self.files_failed > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.to_json()?;
        fs::write(path, json + "\n")?;
        Ok(())
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        let status = match (self.completed, self.dry_run) {
            (true, false) => "Completed",
            (true, true) => "Dry run completed",
            (false, _) => "Aborted",
        };
        format!(
            "{} in {}: copied {} files ({}), skipped {}, failed {}",
            status,
            format_duration(self.duration),
            self.files_copied,
            format_bytes(self.bytes_copied),
            self.files_skipped,
            self.files_failed
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::plan::DecisionReason;

    fn decision(path: &str, action: Action, reason: DecisionReason, size: u64) -> BackupDecision {
        BackupDecision {
            relative_path: path.to_string(),
            action,
            reason,
            size_bytes: size,
        }
    }

    #[test]
    fn test_counters() {
        let mut report = RunReport::new(BackupMode::Incremental, false, StateOrigin::Loaded);
        report.record(decision("a.txt", Action::Copy, DecisionReason::ContentChanged, 7), 7);
        report.record(decision("b.txt", Action::Skip, DecisionReason::Unchanged, 5), 0);
        report.record_failure(
            decision("c.txt", Action::Skip, DecisionReason::Error("permission-denied"), 0),
            FailureStage::Read,
            "Permission denied".into(),
        );
        report.record_failure(
            decision("d.txt", Action::Copy, DecisionReason::New, 3),
            FailureStage::Copy,
            "No space left on device".into(),
        );

        assert_eq!(report.files_copied, 1);
        assert_eq!(report.bytes_copied, 7);
        assert_eq!(report.files_skipped, 2);
        assert_eq!(report.files_failed, 2);
        assert_eq!(report.decisions.len(), 4);
        assert!(report.has_file_errors());
    }

    #[test]
    fn test_json_fields() {
        let mut report = RunReport::new(BackupMode::Full, true, StateOrigin::Missing);
        report.record(decision("a.txt", Action::Copy, DecisionReason::FullMode, 5), 5);
        report.finish(Duration::from_millis(1500), true);

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["files_copied"], 1);
        assert_eq!(value["bytes_copied"], 5);
        assert_eq!(value["files_skipped"], 0);
        assert_eq!(value["duration_seconds"], 1.5);
        assert_eq!(value["mode"], "full");
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["state_origin"], "missing");
        assert_eq!(value["decisions"][0]["reason"], "full-mode");
        assert_eq!(value["decisions"][0]["action"], "copy");
    }

    #[test]
    fn test_not_started_report() {
        let mut report = RunReport::not_started(BackupMode::Incremental, true);
        report.finish(Duration::from_millis(3), false);

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["completed"], false);
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["mode"], "incremental");
        assert!(value["state_origin"].is_null());
        assert_eq!(value["files_copied"], 0);
        assert_eq!(value["decisions"].as_array().unwrap().len(), 0);
        assert!(report.summary_line().starts_with("Aborted in "));
    }

    #[test]
    fn test_summary_line() {
        let mut report = RunReport::new(BackupMode::Incremental, false, StateOrigin::Loaded);
        report.record(decision("a.txt", Action::Copy, DecisionReason::New, 2048), 2048);
        report.finish(Duration::from_millis(120), true);

        assert_eq!(
            report.summary_line(),
            "Completed in 0.12s: copied 1 files (2.00 KB), skipped 0, failed 0"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30.00s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m");
    }
}

//! Configuration management for backup runs.
//!
//! `Settings` holds defaults loaded from an optional TOML file with
//! `BACKUPMATE__*` environment variable overrides. `RunConfig` is the single
//! immutable value handed to the pipeline for one run; it is built from
//! settings plus command line flags.

use crate::fs::walker::ExcludeSet;
use crate::hash::DEFAULT_CHUNK_SIZE;
use crate::state::DEFAULT_STATE_FILE_NAME;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Classification policy for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Copy every eligible file regardless of prior state.
    Full,
    /// Skip files whose content digest is unchanged.
    #[default]
    Incremental,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Full => f.write_str("full"),
            BackupMode::Incremental => f.write_str("incremental"),
        }
    }
}

impl FromStr for BackupMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(BackupMode::Full),
            "incremental" => Ok(BackupMode::Incremental),
            other => Err(BackupError::Config(format!("Invalid mode: {other}"))),
        }
    }
}

/// What to do when the state file exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptStatePolicy {
    #[default]
    Abort,
    TreatAsEmpty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub policy: PolicySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default)]
    pub mode: BackupMode,

    /// Glob patterns excluded from every run
    #[serde(default)]
    pub excludes: Vec<String>,

    /// State file name used when no explicit path is given
    #[serde(default = "default_state_file_name")]
    pub state_file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Files hashed/copied concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Read buffer size for hashing, in bytes
    #[serde(default = "default_hash_chunk_size")]
    pub hash_chunk_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default)]
    pub on_corrupt_state: CorruptStatePolicy,

    /// Abort the whole run on the first failed copy
    #[serde(default)]
    pub abort_on_copy_error: bool,

    /// Exit non-zero when any file could not be read or copied
    #[serde(default)]
    pub fail_on_file_errors: bool,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_file_name() -> String {
    DEFAULT_STATE_FILE_NAME.to_string()
}

fn default_workers() -> usize {
    4
}

fn default_hash_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            mode: BackupMode::default(),
            excludes: Vec::new(),
            state_file_name: default_state_file_name(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            hash_chunk_size: default_hash_chunk_size(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then apply environment
    /// overrides such as `BACKUPMATE__ENGINE__WORKERS=8`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.is_file() {
                return Err(BackupError::Config(format!(
                    "Settings file does not exist: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("BACKUPMATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("backup.excludes"),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}

/// Everything one run needs, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub mode: BackupMode,
    pub excludes: Vec<String>,
    pub state_file: PathBuf,
    pub dry_run: bool,
    pub workers: usize,
    pub hash_chunk_size: usize,
    pub on_corrupt_state: CorruptStatePolicy,
    pub abort_on_copy_error: bool,
    pub fail_on_file_errors: bool,
}

impl RunConfig {
    /// Run configuration with default settings for `source_dir` -> `dest_dir`.
    pub fn new(source_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self::from_settings(source_dir, dest_dir, &Settings::default())
    }

    pub fn from_settings(
        source_dir: impl Into<PathBuf>,
        dest_dir: impl Into<PathBuf>,
        settings: &Settings,
    ) -> Self {
        let dest_dir = dest_dir.into();
        Self {
            source_dir: source_dir.into(),
            state_file: dest_dir.join(&settings.backup.state_file_name),
            dest_dir,
            mode: settings.backup.mode,
            excludes: settings.backup.excludes.clone(),
            dry_run: false,
            workers: settings.engine.workers,
            hash_chunk_size: settings.engine.hash_chunk_size,
            on_corrupt_state: settings.policy.on_corrupt_state,
            abort_on_copy_error: settings.policy.abort_on_copy_error,
            fail_on_file_errors: settings.policy.fail_on_file_errors,
        }
    }

    pub fn with_mode(mut self, mode: BackupMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Check the configuration and compile the exclude patterns.
    pub fn validate(&self) -> Result<ExcludeSet> {
        if !self.source_dir.is_dir() {
            return Err(BackupError::Config(format!(
                "Source directory does not exist: {}",
                self.source_dir.display()
            )));
        }
        if self.dest_dir.exists() && !self.dest_dir.is_dir() {
            return Err(BackupError::Config(format!(
                "Destination is not a directory: {}",
                self.dest_dir.display()
            )));
        }
        if self.workers == 0 {
            return Err(BackupError::Config("workers must be at least 1".into()));
        }
        if self.hash_chunk_size == 0 {
            return Err(BackupError::Config("hash_chunk_size must be at least 1".into()));
        }

        ExcludeSet::new(self.excludes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.backup.mode, BackupMode::Incremental);
        assert_eq!(settings.engine.workers, 4);
        assert_eq!(settings.engine.hash_chunk_size, 1024 * 1024);
        assert_eq!(settings.policy.on_corrupt_state, CorruptStatePolicy::Abort);
        assert!(!settings.policy.fail_on_file_errors);

        let run = RunConfig::new("/src", "/dest");
        assert_eq!(run.state_file, PathBuf::from("/dest/.backupmate_state.json"));
        assert!(!run.dry_run);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<BackupMode>().unwrap(), BackupMode::Full);
        assert_eq!(
            "incremental".parse::<BackupMode>().unwrap(),
            BackupMode::Incremental
        );
        let err = "bad".parse::<BackupMode>().unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_load_settings_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backupmate.toml");
        fs::write(
            &path,
            r#"
[backup]
mode = "full"
excludes = ["*.log", "target"]

[engine]
workers = 2

[policy]
on_corrupt_state = "treat-as-empty"
"#,
        )?;

        let settings = Settings::load(Some(path.as_path()))?;
        assert_eq!(settings.backup.mode, BackupMode::Full);
        assert_eq!(settings.backup.excludes, vec!["*.log", "target"]);
        assert_eq!(settings.engine.workers, 2);
        assert_eq!(settings.engine.hash_chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(
            settings.policy.on_corrupt_state,
            CorruptStatePolicy::TreatAsEmpty
        );
        assert_eq!(settings.log.level, "info");
        Ok(())
    }

    #[test]
    fn test_missing_settings_file_is_config_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/backupmate.toml"))).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_validate() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        fs::create_dir(&src)?;

        let ok = RunConfig::new(&src, temp_dir.path().join("dest"));
        assert!(ok.validate().is_ok());

        let missing = RunConfig::new(temp_dir.path().join("nope"), temp_dir.path().join("dest"));
        assert!(matches!(missing.validate(), Err(BackupError::Config(_))));

        let zero_workers = RunConfig::new(&src, temp_dir.path().join("dest")).with_workers(0);
        assert!(matches!(zero_workers.validate(), Err(BackupError::Config(_))));

        let bad_pattern =
            RunConfig::new(&src, temp_dir.path().join("dest")).with_excludes(["[unclosed"]);
        assert!(matches!(
            bad_pattern.validate(),
            Err(BackupError::InvalidPattern { .. })
        ));
        Ok(())
    }
}

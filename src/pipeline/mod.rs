//! Load pipelines
//!
//! - [`full_load`]: drop, recreate and fill every target table from its snapshot
//! - [`incremental_update`]: stage, upsert and prune each dataset with a present input file
//! - [`check_integrity`]: count foreign-key orphans across the managed tables
//!
//! Both loaders return a [`RunReport`]. Dataset-level failures are recorded in the
//! report; database failures halt the run unless [`ErrorPolicy::Continue`] is chosen.

pub mod full_load;
pub mod incremental;
pub mod integrity;

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use thiserror::Error;
use tracing::{error, warn};

use crate::archive::{self, ArchiveError};
use crate::config::EtlConfig;
use crate::database::DatabaseError;
use crate::models::DatasetSpec;
use crate::transform::TransformError;

pub use full_load::full_load;
pub use incremental::incremental_update;
pub use integrity::{IntegrityReport, OrphanCheck, check_integrity};

const MAX_REPORTED_ERRORS: usize = 100;

/// Error type for one dataset's pass through a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Incremental update against a table that was never loaded
    #[error("Table '{table}' for dataset '{dataset}' does not exist; run the full load first")]
    MissingTable { dataset: String, table: String },
}

impl PipelineError {
    /// Whether this failure stops the run under [`ErrorPolicy::Halt`]
    pub fn halts_run(&self) -> bool {
        matches!(self, PipelineError::Database(_))
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What to do after a database failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop processing further datasets
    #[default]
    Halt,
    /// Record the failure and carry on with the next dataset
    Continue,
}

impl ErrorPolicy {
    pub fn from_continue_flag(continue_on_error: bool) -> Self {
        if continue_on_error {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Halt
        }
    }
}

/// Options shared by both loaders
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub error_policy: ErrorPolicy,
    /// Move processed input files to the archive
    pub archive: bool,
    /// Fixed run timestamp; defaults to now
    pub run_ts: Option<NaiveDateTime>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Halt,
            archive: true,
            run_ts: None,
        }
    }
}

impl RunOptions {
    /// The timestamp stamped on rows and used for the archive folder
    pub fn run_timestamp(&self) -> NaiveDateTime {
        self.run_ts.unwrap_or_else(run_timestamp)
    }
}

/// Current UTC time truncated to the minute
pub fn run_timestamp() -> NaiveDateTime {
    floor_to_minute(Utc::now())
}

/// Truncate to the minute and drop the timezone
pub fn floor_to_minute(at: DateTime<Utc>) -> NaiveDateTime {
    let naive = at.naive_utc();
    naive
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(naive)
}

/// Row changes applied by an incremental update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ChangeCounts {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted",
            self.inserted, self.updated, self.deleted
        )
    }
}

/// Final state of one dataset in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetStatus {
    /// Table rebuilt by a full load
    Loaded { rows: i64 },
    /// Table reconciled by an incremental update
    Reconciled(ChangeCounts),
    /// No input file this run
    Skipped,
    Failed { error: String },
    /// Not reached because the run halted
    NotRun,
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetStatus::Loaded { rows } => write!(f, "loaded {} rows", rows),
            DatasetStatus::Reconciled(counts) => write!(f, "{}", counts),
            DatasetStatus::Skipped => write!(f, "skipped (no input file)"),
            DatasetStatus::Failed { error } => write!(f, "failed: {}", error),
            DatasetStatus::NotRun => write!(f, "not run"),
        }
    }
}

/// Outcome of one dataset
#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub table: String,
    pub status: DatasetStatus,
    /// Whether the input file was moved to the archive
    pub archived: bool,
}

/// Summary of a full load or incremental update
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_ts: NaiveDateTime,
    /// One entry per configured dataset, in load order
    pub outcomes: Vec<DatasetOutcome>,
    /// A database failure stopped the run
    pub halted: bool,
    /// Archive destinations
    pub archived: Vec<std::path::PathBuf>,
    /// Errors encountered (limited to first 100)
    pub errors: Vec<String>,
    pub duration: Duration,
    started: Instant,
}

impl RunReport {
    pub(crate) fn new(run_ts: NaiveDateTime, datasets: &[DatasetSpec]) -> Self {
        Self {
            run_ts,
            outcomes: datasets
                .iter()
                .map(|spec| DatasetOutcome {
                    dataset: spec.name.clone(),
                    table: spec.table.clone(),
                    status: DatasetStatus::NotRun,
                    archived: false,
                })
                .collect(),
            halted: false,
            archived: Vec::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
            started: Instant::now(),
        }
    }

    /// Add an error message (limited to first 100)
    pub fn add_error(&mut self, error: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error);
        }
    }

    pub(crate) fn set_status(&mut self, dataset: &str, status: DatasetStatus) {
        if let Some(outcome) = self.outcomes.iter_mut().find(|o| o.dataset == dataset) {
            outcome.status = status;
        }
    }

    pub(crate) fn mark_archived(&mut self, dataset: &str) {
        if let Some(outcome) = self.outcomes.iter_mut().find(|o| o.dataset == dataset) {
            outcome.archived = true;
        }
    }

    /// Record a dataset failure and apply the error policy
    pub(crate) fn fail(&mut self, spec: &DatasetSpec, err: PipelineError, policy: ErrorPolicy) {
        error!("[{}] {}", spec.name, err);
        if err.halts_run() && policy == ErrorPolicy::Halt {
            error!("Halting run after failure in dataset '{}'", spec.name);
            self.halted = true;
        }
        let message = err.to_string();
        self.add_error(format!("{}: {}", spec.name, message));
        self.set_status(&spec.name, DatasetStatus::Failed { error: message });
    }

    pub(crate) fn finish(mut self) -> Self {
        self.duration = self.started.elapsed();
        self
    }

    pub fn outcome(&self, dataset: &str) -> Option<&DatasetOutcome> {
        self.outcomes.iter().find(|o| o.dataset == dataset)
    }

    /// Whether any dataset failed
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.status, DatasetStatus::Failed { .. }))
    }

    /// The run completed and no dataset failed
    pub fn is_success(&self) -> bool {
        !self.halted && !self.has_failures()
    }

    /// Sum of changes over all reconciled datasets
    pub fn total_changes(&self) -> ChangeCounts {
        self.outcomes
            .iter()
            .fold(ChangeCounts::default(), |mut total, o| {
                if let DatasetStatus::Reconciled(c) = o.status {
                    total.inserted += c.inserted;
                    total.updated += c.updated;
                    total.deleted += c.deleted;
                }
                total
            })
    }

    /// Get run duration as human-readable string
    pub fn duration_string(&self) -> String {
        let secs = self.duration.as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Move the input files of `processed` datasets into the run's archive folder
///
/// An archive failure is reported but does not fail the dataset; its data is committed.
pub(crate) fn archive_processed(
    report: &mut RunReport,
    config: &EtlConfig,
    processed: &[&DatasetSpec],
) {
    for spec in processed {
        let source = config.source_path(spec);
        match archive::archive_inputs(&[source], report.run_ts, &config.paths.archive_root) {
            Ok(moved) if moved.is_empty() => {}
            Ok(moved) => {
                report.mark_archived(&spec.name);
                report.archived.extend(moved);
            }
            Err(e) => {
                warn!("[{}] {}", spec.name, e);
                report.add_error(format!("{}: {}", spec.name, PipelineError::from(e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> RunReport {
        let ts = floor_to_minute(Utc::now());
        let mut report = RunReport::new(ts, &[]);
        for name in ["brands", "products"] {
            report.outcomes.push(DatasetOutcome {
                dataset: name.to_string(),
                table: name.to_string(),
                status: DatasetStatus::NotRun,
                archived: false,
            });
        }
        report
    }

    #[test]
    fn test_floor_to_minute() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 59).unwrap()
            + chrono::Duration::milliseconds(999);
        let floored = floor_to_minute(at);
        assert_eq!(floored.to_string(), "2024-03-05 14:07:00");
    }

    #[test]
    fn test_run_options_fixed_timestamp() {
        let ts = NaiveDateTime::parse_from_str("2024-01-01 08:30:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let options = RunOptions {
            run_ts: Some(ts),
            ..Default::default()
        };
        assert_eq!(options.run_timestamp(), ts);
        assert!(options.archive);
        assert_eq!(options.error_policy, ErrorPolicy::Halt);
    }

    #[test]
    fn test_total_changes() {
        let mut report = report();
        report.set_status(
            "brands",
            DatasetStatus::Reconciled(ChangeCounts {
                inserted: 1,
                updated: 2,
                deleted: 3,
            }),
        );
        report.set_status(
            "products",
            DatasetStatus::Reconciled(ChangeCounts {
                inserted: 4,
                updated: 0,
                deleted: 1,
            }),
        );
        let total = report.total_changes();
        assert_eq!(total.inserted, 5);
        assert_eq!(total.updated, 2);
        assert_eq!(total.deleted, 4);
        assert!(report.is_success());
    }

    #[test]
    fn test_database_failure_halts() {
        let mut report = report();
        let spec = crate::models::DatasetSpec {
            name: "brands".to_string(),
            file: "brands.csv".to_string(),
            table: "brands".to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            key_columns: Vec::new(),
            unique_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            transform: Default::default(),
            null_values: vec![],
        };

        let err = PipelineError::Transform(TransformError::FileNotFound("brands.csv".into()));
        report.fail(&spec, err, ErrorPolicy::Halt);
        assert!(!report.halted);
        assert!(report.has_failures());

        let err = PipelineError::Database(DatabaseError::QueryFailed("boom".to_string()));
        report.fail(&spec, err, ErrorPolicy::Continue);
        assert!(!report.halted);

        let err = PipelineError::Database(DatabaseError::QueryFailed("boom".to_string()));
        report.fail(&spec, err, ErrorPolicy::Halt);
        assert!(report.halted);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn test_error_limit() {
        let mut report = report();
        for i in 0..150 {
            report.add_error(format!("error {}", i));
        }
        assert_eq!(report.errors.len(), 100);
    }

    #[test]
    fn test_duration_string() {
        let mut report = report();
        report.duration = Duration::from_secs(42);
        assert_eq!(report.duration_string(), "42s");
        report.duration = Duration::from_secs(125);
        assert_eq!(report.duration_string(), "2m 5s");
        report.duration = Duration::from_secs(3725);
        assert_eq!(report.duration_string(), "1h 2m 5s");
    }
}

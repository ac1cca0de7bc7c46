//! CLI command implementations

pub mod check;
#[cfg(feature = "api-fetch")]
pub mod fetch;
pub mod load;
pub mod sample;

use std::path::{Path, PathBuf};

use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::cli::error::CliError;
use crate::config::{DEFAULT_CONFIG_FILENAME, ENV_CONFIG, EtlConfig};
use crate::database::Session;
use crate::pipeline::{DatasetStatus, RunReport};

/// Configuration file: `--config`, then `RETAIL_ETL_CONFIG`, then `config.yaml`
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME))
}

/// Load and validate the configuration
pub fn load_config(explicit: Option<&Path>) -> Result<EtlConfig, CliError> {
    let path = config_path(explicit);
    info!("Using configuration {}", path.display());
    Ok(EtlConfig::load(&path)?)
}

/// Single-threaded runtime for the async database driver
pub fn runtime() -> Result<Runtime, CliError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))
}

/// Open the run's database session
pub async fn connect(config: &EtlConfig) -> Result<Session, CliError> {
    let credentials = config.credentials()?;
    Ok(Session::connect(&config.db, &credentials).await?)
}

/// Print a run report to stdout
pub fn print_report(title: &str, report: &RunReport) {
    println!("{} at {} ({})", title, report.run_ts, report.duration_string());
    for outcome in &report.outcomes {
        let archived = if outcome.archived { " [archived]" } else { "" };
        println!(
            "  {:<14} {:<14} {}{}",
            outcome.dataset, outcome.table, outcome.status, archived
        );
    }

    if report.outcomes.iter().any(|o| matches!(o.status, DatasetStatus::Reconciled(_))) {
        println!("  total: {}", report.total_changes());
    }
    if report.halted {
        println!("Run halted after a database error");
    }
}

/// Turn a finished report into the command result
pub fn report_result(report: &RunReport) -> Result<(), CliError> {
    if report.is_success() {
        return Ok(());
    }
    let failed = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.status, DatasetStatus::Failed { .. }))
        .count();
    Err(CliError::RunFailed(if report.halted {
        format!("run halted; {} dataset(s) failed", failed)
    } else {
        format!("{} dataset(s) failed", failed)
    }))
}

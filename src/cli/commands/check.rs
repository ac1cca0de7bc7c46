//! Check command implementation

use std::path::PathBuf;

use crate::cli::commands::{connect, load_config, runtime};
use crate::cli::error::CliError;
use crate::pipeline::check_integrity;

/// Arguments for `check`
#[derive(Debug, Clone, Default)]
pub struct CheckArgs {
    pub config: Option<PathBuf>,
    /// Also count foreign-key orphans in the database
    pub integrity: bool,
}

/// Handle the check command
pub fn handle_check(args: &CheckArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;

    println!(
        "Configuration valid: {} datasets in load order",
        config.datasets().len()
    );
    for (i, spec) in config.datasets().iter().enumerate() {
        let parents = spec.parent_tables();
        println!(
            "  {}. {} -> {} (key: {}){}",
            i + 1,
            spec.name,
            spec.table,
            spec.key_columns.join(", "),
            if parents.is_empty() {
                String::new()
            } else {
                format!(", references {}", parents.join(", "))
            }
        );
    }

    if !args.integrity {
        return Ok(());
    }

    let report = runtime()?.block_on(async {
        let session = connect(&config).await?;
        Ok::<_, CliError>(check_integrity(&session, &config).await?)
    })?;

    for check in &report.checks {
        println!(
            "  {:<40} {} orphaned rows",
            check.constraint, check.orphans
        );
    }
    for dataset in &report.skipped {
        println!("  {}: skipped (table missing)", dataset);
    }

    if report.is_clean() {
        println!("No orphaned rows");
        Ok(())
    } else {
        Err(CliError::RunFailed(format!(
            "{} orphaned rows found",
            report.total_orphans()
        )))
    }
}

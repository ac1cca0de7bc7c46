//! Full-load and update command implementations

use std::path::PathBuf;

use crate::cli::commands::{connect, load_config, print_report, report_result, runtime};
use crate::cli::error::CliError;
use crate::pipeline::{ErrorPolicy, RunOptions, full_load, incremental_update};

/// Arguments shared by `full-load` and `update`
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub config: Option<PathBuf>,
    pub continue_on_error: bool,
    pub no_archive: bool,
}

impl LoadArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            error_policy: ErrorPolicy::from_continue_flag(self.continue_on_error),
            archive: !self.no_archive,
            run_ts: None,
        }
    }
}

/// Handle the full-load command
pub fn handle_full_load(args: &LoadArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let options = args.options();

    let report = runtime()?.block_on(async {
        let mut session = connect(&config).await?;
        Ok::<_, CliError>(full_load(&mut session, &config, &options).await)
    })?;

    print_report("Full load", &report);
    report_result(&report)
}

/// Handle the update command
pub fn handle_update(args: &LoadArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let options = args.options();

    let report = runtime()?.block_on(async {
        let mut session = connect(&config).await?;
        Ok::<_, CliError>(incremental_update(&mut session, &config, &options).await)
    })?;

    print_report("Incremental update", &report);
    report_result(&report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_flags() {
        let args = LoadArgs {
            config: None,
            continue_on_error: true,
            no_archive: true,
        };
        let options = args.options();
        assert_eq!(options.error_policy, ErrorPolicy::Continue);
        assert!(!options.archive);

        let options = LoadArgs::default().options();
        assert_eq!(options.error_policy, ErrorPolicy::Halt);
        assert!(options.archive);
    }
}

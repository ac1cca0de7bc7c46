//! Fetch command implementation

use std::path::PathBuf;

use crate::cli::commands::{load_config, runtime};
use crate::cli::error::CliError;
use crate::fetch::fetch_sources;

/// Handle the fetch command
pub fn handle_fetch(config: Option<PathBuf>) -> Result<(), CliError> {
    let config = load_config(config.as_deref())?;
    let written = runtime()?.block_on(fetch_sources(&config))?;

    for path in &written {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

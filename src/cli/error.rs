//! CLI-specific error types

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::database::DatabaseError;
#[cfg(feature = "api-fetch")]
use crate::fetch::FetchError;
use crate::pipeline::PipelineError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[cfg(feature = "api-fetch")]
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(String),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("File already exists: {0} (use --force to overwrite)")]
    FileExists(PathBuf),

    /// The run completed with failed datasets or halted
    #[error("{0}")]
    RunFailed(String),
}

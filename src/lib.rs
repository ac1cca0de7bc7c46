//! Retail ETL - snapshot loads and incremental upserts of retail CSV exports
//!
//! Provides:
//! - Configuration loading and validation (datasets, keys, constraints, load order)
//! - Dataset transforms (rename, trim, type coercion, line numbers, aggregation)
//! - A full load that rebuilds every table from its snapshot
//! - An incremental update that upserts and prunes against staged snapshots
//! - Archiving of processed inputs and an optional JSON API fetch helper

pub mod archive;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod database;
#[cfg(feature = "api-fetch")]
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod transform;
pub mod validation;

pub use archive::{ArchiveError, archive_inputs};
pub use config::{ConfigError, Credentials, EtlConfig, sample_config};
pub use database::{DatabaseError, Session};
#[cfg(feature = "api-fetch")]
pub use fetch::{FetchError, fetch_sources};
pub use models::{
    ColumnSpec, ColumnType, DatasetSpec, ForeignKey, Frame, ReferentialAction, Value,
};
pub use pipeline::{
    ChangeCounts, DatasetStatus, ErrorPolicy, IntegrityReport, PipelineError, RunOptions,
    RunReport, check_integrity, full_load, incremental_update,
};
pub use transform::{TransformError, TransformSpec};
pub use validation::{ValidationError, ValidationResult};

//! Command-line interface for the `retail-etl` binary

pub mod commands;
pub mod error;

//! Data models for the retail ETL pipeline
//!
//! Defines the typed descriptors resolved from configuration ([`DatasetSpec`],
//! [`ColumnSpec`], [`ForeignKey`]) and the in-memory tabular data ([`Frame`], a polars
//! DataFrame materialized as [`Value`] rows) that flows from CSV input to the database.

pub mod column;
pub mod dataset;
pub mod frame;
pub mod value;

pub use column::{ColumnSpec, ColumnType, TypeSpec};
pub use dataset::{DatasetSpec, ForeignKey, LAST_UPDATED, ReferentialAction, STAGING_SUFFIX};
pub use frame::Frame;
pub use value::Value;

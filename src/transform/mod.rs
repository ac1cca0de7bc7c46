//! Dataset transformation
//!
//! Turns a raw CSV [`Frame`] (text and NULL only) into a typed frame laid out exactly like
//! the target table: renamed, trimmed and cast columns in declaration order, optional line
//! number backfill or aggregation, and the trailing `last_updated` stamp.
//!
//! Steps run in a fixed order: rename, trim, cast, line number, aggregate, require,
//! project. Any failure aborts the dataset only.

pub mod builtin;
pub mod extract;

use std::path::PathBuf;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use polars::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::frame::typed_column;
use crate::models::{ColumnType, DatasetSpec, Frame, LAST_UPDATED, Value};

pub use builtin::{builtin, resolve};
pub use extract::{load_dataset, prepare_dataset, read_csv};

/// Error type for dataset transformation
#[derive(Debug, Error)]
pub enum TransformError {
    /// Input file does not exist
    #[error("Input file not found: {0}")]
    FileNotFound(PathBuf),

    /// Input file could not be read or is not valid CSV
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Declared columns are absent after renaming
    #[error("Dataset '{dataset}': missing columns: {}", .columns.join(", "))]
    MissingColumns {
        dataset: String,
        columns: Vec<String>,
    },

    /// A value could not be converted to its declared type
    #[error(
        "Dataset '{dataset}': cannot convert '{value}' in column '{column}' (row {row}) to {ty}: {reason}"
    )]
    Coercion {
        dataset: String,
        column: String,
        /// 1-based data row
        row: usize,
        value: String,
        ty: ColumnType,
        reason: String,
    },

    /// Two rows share a key
    #[error("Dataset '{dataset}': duplicate key ({key}) on [{}]", .columns.join(", "))]
    DuplicateKey {
        dataset: String,
        columns: Vec<String>,
        key: String,
    },

    /// A key column holds NULL
    #[error("Dataset '{dataset}': NULL in key column '{column}' (row {row})")]
    NullKey {
        dataset: String,
        column: String,
        row: usize,
    },

    /// A frame operation failed
    #[error("Dataset '{dataset}': {source}")]
    Frame {
        dataset: String,
        #[source]
        source: PolarsError,
    },
}

/// Result type for transform operations
pub type TransformResult<T> = Result<T, TransformError>;

/// Backfill a per-group sequence number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LineNumberRule {
    /// Column receiving `1..n`
    pub column: String,
    #[serde(default)]
    pub partition_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<String>,
}

/// Collapse rows sharing `group_by` by summing `sum`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregateRule {
    pub group_by: Vec<String>,
    pub sum: Vec<String>,
}

/// Per-dataset transform descriptor
///
/// Comes from a dataset's `transform:` block or, when absent, from [`builtin`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    /// `from -> to`, applied in order, only when `from` is present and `to` is not
    pub rename: IndexMap<String, String>,
    /// String columns to strip of surrounding whitespace
    pub trim: Vec<String>,
    /// chrono formats for date and date-time columns
    pub date_formats: IndexMap<String, String>,
    /// Columns whose unparseable values become NULL instead of failing the dataset
    pub lenient: Vec<String>,
    pub line_number: Option<LineNumberRule>,
    pub aggregate: Option<AggregateRule>,
}

impl TransformSpec {
    pub fn date_format(&self, column: &str) -> Option<&str> {
        self.date_formats.get(column).map(String::as_str)
    }

    pub fn is_lenient(&self, column: &str) -> bool {
        self.lenient.iter().any(|c| c == column)
    }
}

/// Names from `names` that `frame` does not have
fn absent(frame: &Frame, names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| !frame.has_column(name))
        .cloned()
        .collect()
}

fn require(spec: &DatasetSpec, frame: &Frame, names: &[String]) -> TransformResult<()> {
    let missing = absent(frame, names);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TransformError::MissingColumns {
            dataset: spec.name.clone(),
            columns: missing,
        })
    }
}

fn frame_err(spec: &DatasetSpec) -> impl Fn(PolarsError) -> TransformError + '_ {
    move |source| TransformError::Frame {
        dataset: spec.name.clone(),
        source,
    }
}

fn columns(names: &[String]) -> Vec<Expr> {
    names.iter().map(|name| col(name.as_str())).collect()
}

fn apply_renames(spec: &DatasetSpec, frame: Frame) -> TransformResult<Frame> {
    let mut df = frame.into_data();
    for (from, to) in &spec.transform.rename {
        if df.get_column_index(from).is_some() && df.get_column_index(to).is_none() {
            df.rename(from, to.as_str().into())
                .map_err(frame_err(spec))?;
            // polars 0.48 `rename` leaves the cached schema stale.
            df.clear_schema();
            debug!("[{}] Renamed column {} -> {}", spec.name, from, to);
        }
    }
    Ok(Frame::new(df))
}

fn apply_trim(spec: &DatasetSpec, frame: Frame) -> TransformResult<Frame> {
    let exprs: Vec<Expr> = spec
        .transform
        .trim
        .iter()
        .filter(|name| {
            frame
                .data()
                .column(name)
                .is_ok_and(|c| c.dtype() == &DataType::String)
        })
        .map(|name| col(name.as_str()).str().strip_chars(lit(NULL)))
        .collect();
    if exprs.is_empty() {
        return Ok(frame);
    }

    let df = frame
        .into_data()
        .lazy()
        .with_columns(exprs)
        .collect()
        .map_err(frame_err(spec))?;
    Ok(Frame::new(df))
}

/// Cast one raw text column to its declared type
///
/// Blank text in a non-string column is NULL. Unparseable values fail the dataset unless
/// the column is lenient, in which case they become NULL.
fn cast_column(spec: &DatasetSpec, column: &Column, ty: ColumnType) -> TransformResult<Column> {
    let name = column.name().as_str();
    let format = spec.transform.date_format(name);
    let lenient = spec.transform.is_lenient(name);
    let is_string = matches!(ty, ColumnType::String { .. });

    let text = column.cast(&DataType::String).map_err(frame_err(spec))?;
    let text = text.as_materialized_series().str().map_err(frame_err(spec))?;

    let mut coerced = 0usize;
    let mut values = Vec::with_capacity(text.len());
    for (row_idx, cell) in text.into_iter().enumerate() {
        let value = match cell {
            None => Value::Null,
            Some(raw) if !is_string && raw.trim().is_empty() => Value::Null,
            Some(raw) => match ty.parse_value(raw, format) {
                Ok(v) => v,
                Err(_) if lenient => {
                    coerced += 1;
                    Value::Null
                }
                Err(reason) => {
                    return Err(TransformError::Coercion {
                        dataset: spec.name.clone(),
                        column: name.to_string(),
                        row: row_idx + 1,
                        value: raw.to_string(),
                        ty,
                        reason,
                    });
                }
            },
        };
        values.push(value);
    }

    if coerced > 0 {
        warn!(
            "[{}] {} unparseable values in '{}' set to NULL",
            spec.name, coerced, name
        );
    }
    typed_column(name, ty, &values).map_err(frame_err(spec))
}

/// Cast declared columns to their types and drop undeclared ones
fn cast_columns(spec: &DatasetSpec, frame: Frame) -> TransformResult<Frame> {
    let df = frame.into_data();
    let mut cast = Vec::new();
    for raw in df.get_columns() {
        if let Some(column) = spec.column(raw.name().as_str()) {
            cast.push(cast_column(spec, raw, column.ty)?);
        }
    }

    let dropped = df.width() - cast.len();
    if dropped > 0 {
        debug!("[{}] Dropping {} undeclared columns", spec.name, dropped);
    }

    let df = DataFrame::new(cast).map_err(frame_err(spec))?;
    Ok(Frame::new(df))
}

fn apply_line_number(spec: &DatasetSpec, frame: Frame) -> TransformResult<Frame> {
    let Some(rule) = &spec.transform.line_number else {
        return Ok(frame);
    };

    let needs_backfill = match frame.data().column(&rule.column) {
        Ok(values) => values.null_count() > 0,
        Err(_) => true,
    };
    if !needs_backfill {
        return Ok(frame);
    }

    require(spec, &frame, &rule.order_by)?;
    require(spec, &frame, &rule.partition_by)?;
    let Some(anchor) = frame.columns().into_iter().next() else {
        return Ok(frame);
    };

    let mut lf = frame.into_data().lazy();
    if !rule.order_by.is_empty() {
        lf = lf.sort_by_exprs(
            columns(&rule.order_by),
            SortMultipleOptions::default().with_maintain_order(true),
        );
    }

    let mut number = col(anchor.as_str()).is_null().cum_count(false);
    if !rule.partition_by.is_empty() {
        number = number.over(columns(&rule.partition_by));
    }
    let df = lf
        .with_column(number.cast(DataType::Int64).alias(rule.column.as_str()))
        .collect()
        .map_err(frame_err(spec))?;

    debug!(
        "[{}] Backfilled '{}' over {} rows",
        spec.name,
        rule.column,
        df.height()
    );
    Ok(Frame::new(df))
}

fn apply_aggregate(spec: &DatasetSpec, frame: Frame) -> TransformResult<Frame> {
    let Some(rule) = &spec.transform.aggregate else {
        return Ok(frame);
    };

    require(spec, &frame, &rule.group_by)?;
    require(spec, &frame, &rule.sum)?;

    let before = frame.len();
    let keys = columns(&rule.group_by);
    let sums: Vec<Expr> = rule.sum.iter().map(|c| col(c.as_str()).sum()).collect();
    let df = frame
        .into_data()
        .lazy()
        .group_by(keys.clone())
        .agg(sums)
        .sort_by_exprs(keys, SortMultipleOptions::default())
        .collect()
        .map_err(frame_err(spec))?;

    debug!(
        "[{}] Aggregated {} rows into {} groups",
        spec.name,
        before,
        df.height()
    );
    Ok(Frame::new(df))
}

/// Apply a dataset's transform descriptor to a raw frame
///
/// The result has exactly the table columns of `spec` (declared columns then
/// `last_updated`), with every value cast to its declared type and `last_updated` set
/// to `run_ts`.
pub fn transform_dataset(
    spec: &DatasetSpec,
    frame: Frame,
    run_ts: NaiveDateTime,
) -> TransformResult<Frame> {
    let frame = apply_renames(spec, frame)?;
    let frame = apply_trim(spec, frame)?;
    let frame = cast_columns(spec, frame)?;
    let frame = apply_line_number(spec, frame)?;
    let frame = apply_aggregate(spec, frame)?;

    let names: Vec<String> = spec.columns.iter().map(|c| c.name.clone()).collect();
    require(spec, &frame, &names)?;

    let mut df = frame
        .data()
        .select(names.iter().map(String::as_str))
        .map_err(frame_err(spec))?;
    let stamps = vec![Value::Timestamp(run_ts); df.height()];
    let stamp = typed_column(LAST_UPDATED, ColumnType::DateTime, &stamps).map_err(frame_err(spec))?;
    df.with_column(stamp).map_err(frame_err(spec))?;
    Ok(Frame::new(df))
}

/// Render one key of `keys` for error messages
fn key_at(keys: &DataFrame, row: usize) -> String {
    keys.get_columns()
        .iter()
        .map(|c| c.get(row).map(Value::from).unwrap_or(Value::Null).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_unique(
    spec: &DatasetSpec,
    frame: &Frame,
    columns: &[String],
    reject_null: bool,
) -> TransformResult<()> {
    require(spec, frame, columns)?;
    let df = frame.data();

    if reject_null {
        for name in columns {
            let column = df.column(name).map_err(frame_err(spec))?;
            if column.null_count() == 0 {
                continue;
            }
            let nulls = column.is_null();
            let row = (&nulls)
                .into_iter()
                .position(|null| null == Some(true))
                .unwrap_or_default();
            return Err(TransformError::NullKey {
                dataset: spec.name.clone(),
                column: name.clone(),
                row: row + 1,
            });
        }
    }

    let mut keys = df
        .select(columns.iter().map(String::as_str))
        .map_err(frame_err(spec))?;
    if !reject_null {
        // NULLs never collide in a unique constraint.
        keys = keys
            .lazy()
            .drop_nulls(None)
            .collect()
            .map_err(frame_err(spec))?;
    }

    let duplicated = keys.is_duplicated().map_err(frame_err(spec))?;
    if let Some(row) = (&duplicated).into_iter().position(|dup| dup == Some(true)) {
        return Err(TransformError::DuplicateKey {
            dataset: spec.name.clone(),
            columns: columns.to_vec(),
            key: key_at(&keys, row),
        });
    }
    Ok(())
}

/// Check that a transformed frame satisfies the dataset's keys
///
/// The primary key (when there is one) and the upsert key must be non-NULL and unique;
/// unique constraints must hold among rows without NULLs. Run after dropping exact
/// duplicates.
pub fn check_keys(spec: &DatasetSpec, frame: &Frame) -> TransformResult<()> {
    if !spec.primary_key.is_empty() {
        check_unique(spec, frame, &spec.primary_key, true)?;
    }
    if spec.key_columns != spec.primary_key {
        check_unique(spec, frame, &spec.key_columns, true)?;
    }
    for unique in &spec.unique_constraints {
        check_unique(spec, frame, unique, false)?;
    }
    Ok(())
}

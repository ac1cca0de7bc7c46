//! In-memory tabular data for one dataset snapshot

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use super::{ColumnType, Value};
use super::value::UNIX_EPOCH_DAYS_FROM_CE;

/// A polars [`DataFrame`] holding one dataset
///
/// Raw frames read from CSV hold only `String` columns; transformed frames hold one
/// typed column per table column, in table order.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    df: DataFrame,
}

impl Frame {
    pub fn new(df: DataFrame) -> Self {
        Self { df }
    }

    pub fn data(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_data(self) -> DataFrame {
        self.df
    }

    pub fn columns(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.df.get_column_index(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value at a 0-based row of a named column
    pub fn value(&self, row: usize, column: &str) -> Option<Value> {
        let column = self.df.column(column).ok()?;
        column.get(row).ok().map(Value::from)
    }

    /// Materialize every row as SQL-bindable values, in column order
    pub fn rows(&self) -> Vec<Vec<Value>> {
        let columns = self.df.get_columns();
        (0..self.df.height())
            .map(|i| {
                columns
                    .iter()
                    .map(|c| c.get(i).map(Value::from).unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }

    /// Remove exact duplicate rows, keeping the first occurrence
    ///
    /// Returns the number of rows removed.
    pub fn drop_duplicates(&mut self) -> PolarsResult<usize> {
        let before = self.df.height();
        self.df = self
            .df
            .clone()
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()?;
        Ok(before - self.df.height())
    }
}

impl From<DataFrame> for Frame {
    fn from(df: DataFrame) -> Self {
        Self::new(df)
    }
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn micros_since_epoch(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

/// Build a typed column from cast values
///
/// `values` must already match `ty` (or be NULL); anything else becomes NULL.
pub(crate) fn typed_column(name: &str, ty: ColumnType, values: &[Value]) -> PolarsResult<Column> {
    let name = PlSmallStr::from(name);
    let series = match ty {
        ColumnType::String { .. } => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::Text(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect::<Vec<_>>(),
        ),
        ColumnType::Integer => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        ColumnType::Float => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Float(x) => Some(*x),
                    Value::Integer(i) => Some(*i as f64),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        ColumnType::Boolean => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        ColumnType::Date => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Date(d) => Some(days_since_epoch(*d)),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )
        .cast(&DataType::Date)?,
        ColumnType::DateTime => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Timestamp(ts) => Some(micros_since_epoch(*ts)),
                    Value::Date(d) => d.and_hms_opt(0, 0, 0).map(micros_since_epoch),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
    };
    Ok(Column::from(series))
}
